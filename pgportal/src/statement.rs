use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::common::ByteStr;

/// Client chosen object name, empty for the unnamed object.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Id(ByteStr);

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self(ByteStr::from_static(""))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_unnamed(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.is_unnamed() {
            true => f.write_str("<unnamed>"),
            false => f.write_str(self.as_str()),
        }
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($name:ident) => {
        #[derive(Clone, Default, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            /// The unnamed object.
            pub fn unnamed() -> Self {
                Self(Id::unnamed())
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<&'static str> for $name {
            fn from(value: &'static str) -> Self {
                Self(Id(value.into()))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Id(value.into()))
            }
        }

        impl From<ByteStr> for $name {
            fn from(value: ByteStr) -> Self {
                Self(Id(value))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

delegate!(StatementName);
delegate!(PortalName);

/// Identity of one parsed statement.
///
/// Assigned once when a statement is parsed, copies of the same [`Statement`]
/// share it, two parses of the same text do not.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementToken(u64);

impl StatementToken {
    pub(crate) fn next() -> Self {
        static TOKEN: AtomicU64 = AtomicU64::new(1);
        Self(TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for StatementToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut b = itoa::Buffer::new();
        f.write_str("s")?;
        f.write_str(b.format(self.0))
    }
}

/// A parsed statement, produced by the parser front-end.
///
/// `T` is the parser's syntax tree, opaque to portals and handed to the
/// [`Analyzer`][crate::Analyzer] as is. Equality compares [`StatementToken`]s.
pub struct Statement<T> {
    token: StatementToken,
    tree: Arc<T>,
}

impl<T> Statement<T> {
    /// Wrap a freshly parsed tree, assigning a new token.
    pub fn new(tree: T) -> Self {
        Self { token: StatementToken::next(), tree: Arc::new(tree) }
    }

    pub fn token(&self) -> StatementToken {
        self.token
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }
}

impl<T> Clone for Statement<T> {
    fn clone(&self) -> Self {
        Self { token: self.token, tree: Arc::clone(&self.tree) }
    }
}

impl<T> PartialEq for Statement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl<T> Eq for Statement<T> { }

impl<T> std::fmt::Debug for Statement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Statement").field(&self.token).finish()
    }
}
