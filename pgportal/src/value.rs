//! Bind parameters and result rows.
//!
//! Both are plain sequences of [`Value`]. Wire encoding happens in the
//! protocol front-end, this crate only moves them around.
use bytes::Bytes;
use std::sync::Arc;

use crate::common::ByteStr;

/// Postgres object id of a type.
pub type Oid = u32;

/// Postgres value format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PgFormat {
    #[default]
    Text,
    Binary,
}

impl PgFormat {
    /// Format from a `Bind` message format code.
    pub fn from_code(code: u16) -> Option<PgFormat> {
        match code {
            0 => Some(PgFormat::Text),
            1 => Some(PgFormat::Binary),
            _ => None,
        }
    }
}

/// A single value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(ByteStr),
    Bytes(Bytes),
}

impl Value {
    /// Returns the integer if value is [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

macro_rules! from {
    ($ty:ty, $pat:pat => $body:expr) => {
        impl From<$ty> for Value {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(bool, v => Value::Bool(v));
from!(i32, v => Value::Int(v.into()));
from!(i64, v => Value::Int(v));
from!(f64, v => Value::Float(v));
from!(&'static str, v => Value::Text(ByteStr::from_static(v)));
from!(String, v => Value::Text(v.into()));
from!(ByteStr, v => Value::Text(v));
from!(Bytes, v => Value::Bytes(v));

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// An immutable, cheaply cloneable sequence of values.
///
/// Used for result rows as well as bound parameters.
#[derive(Clone, Default, PartialEq)]
pub struct Row {
    values: Arc<[Value]>,
}

/// Bound parameters of a statement.
pub type Params = Row;

impl Row {
    pub fn new(values: impl Into<Arc<[Value]>>) -> Row {
        Row { values: values.into() }
    }

    /// A one column row holding the number of affected rows.
    pub fn row_count(count: u64) -> Row {
        Row::new([Value::Int(count.try_into().unwrap_or(i64::MAX))])
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for Row {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Row { values: iter.into_iter().map(Into::into).collect() }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}

/// Build a [`Row`] from values.
///
/// ```
/// let row = pgportal::row![1, "foo", None::<i32>];
/// assert_eq!(row.len(), 3);
/// ```
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::Row::new([$($crate::Value::from($value)),*])
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn row_macro() {
        let row = crate::row![1, "foo", None::<i32>];
        assert_eq!(row.values(), &[Value::Int(1), Value::Text("foo".into()), Value::Null]);
        assert_eq!(Row::row_count(3).get(0).and_then(Value::as_int), Some(3));
    }

    #[test]
    fn format_code() {
        assert_eq!(PgFormat::from_code(1), Some(PgFormat::Binary));
        assert_eq!(PgFormat::from_code(7), None);
    }
}
