//! `pgportal` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, sync::Arc};

/// A specialized [`Result`] type for `pgportal` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgportal` library.
///
/// The same failure is often reported to both a [`ResultSink`][crate::ResultSink] and a
/// [`Completion`][crate::Completion], thus `Error` is cheaply cloneable.
#[derive(Clone)]
pub struct Error {
    context: String,
    backtrace: Arc<Backtrace>,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if this is a read-only violation.
    pub fn is_read_only(&self) -> bool {
        matches!(self.kind, ErrorKind::ReadOnly(_))
    }

    pub(crate) fn read_only() -> Self {
        ReadOnlyError.into()
    }

    /// Statement cannot be analyzed.
    pub fn analysis(reason: impl Into<Cow<'static, str>>) -> Self {
        AnalysisError { reason: reason.into() }.into()
    }

    /// Plan cannot be built.
    pub fn planning(reason: impl Into<Cow<'static, str>>) -> Self {
        PlanError { reason: reason.into() }.into()
    }

    /// Plan execution failed.
    pub fn execution(reason: impl Into<Cow<'static, str>>) -> Self {
        ExecutionError { reason: reason.into() }.into()
    }

    pub(crate) fn protocol(reason: impl Into<Cow<'static, str>>) -> Self {
        ProtocolError { reason: reason.into() }.into()
    }

    pub(crate) fn closed(what: &'static str) -> Self {
        ClosedError { what }.into()
    }
}

/// All possible error kind from `pgportal` library.
#[derive(Clone)]
pub enum ErrorKind {
    ReadOnly(ReadOnlyError),
    Analysis(AnalysisError),
    Planning(PlanError),
    Execution(ExecutionError),
    Protocol(ProtocolError),
    Closed(ClosedError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = Arc::new(Backtrace::capture());
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ReadOnlyError>e => ErrorKind::ReadOnly(e));
from!(<AnalysisError>e => ErrorKind::Analysis(e));
from!(<PlanError>e => ErrorKind::Planning(e));
from!(<ExecutionError>e => ErrorKind::Execution(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<ClosedError>e => ErrorKind::Closed(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        write!(f, "{}", self.kind)?;

        if f.alternate() {
            return Ok(());
        }

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self:#}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly(e) => e.fmt(f),
            Self::Analysis(e) => e.fmt(f),
            Self::Planning(e) => e.fmt(f),
            Self::Execution(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Write or bulk operation attempted in a read-only session.
#[derive(Clone, Debug)]
pub struct ReadOnlyError;

impl std::error::Error for ReadOnlyError { }

impl fmt::Display for ReadOnlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("only read operations are allowed on this session")
    }
}

macro_rules! reason_error {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            pub(crate) reason: Cow<'static, str>,
        }

        impl $name {
            /// Returns the error reason without prefix.
            pub fn reason(&self) -> &str {
                &self.reason
            }
        }

        impl std::error::Error for $name { }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if f.alternate() {
                    return f.write_str(&self.reason)
                }
                write!(f, concat!($prefix, ": {}"), self.reason)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "\"{self}\"")
            }
        }
    };
}

reason_error! {
    /// Statement is malformed or ill-typed.
    AnalysisError, "analysis failed"
}

reason_error! {
    /// Planner refused the analyzed statement.
    PlanError, "planning failed"
}

reason_error! {
    /// Failure reported while a plan was producing rows.
    ExecutionError, "execution failed"
}

reason_error! {
    /// Portal operation issued out of protocol order.
    ProtocolError, "protocol violation"
}

/// A consumer or completion was dropped before reporting a terminal signal.
#[derive(Clone, Debug)]
pub struct ClosedError {
    what: &'static str,
}

impl std::error::Error for ClosedError { }

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} closed", self.what)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_kind_and_context() {
        let err = Error::planning("no such table").context("sync");
        assert_eq!(format!("{err:#}"), "sync: planning failed: no such table");
        assert_eq!(Error::read_only().to_string().lines().next(), Some("only read operations are allowed on this session"));
        assert!(Error::read_only().is_read_only());
    }

    #[test]
    fn clone_shares_kind() {
        let err = Error::execution("shard failure");
        let clone = err.clone();
        let ErrorKind::Execution(e) = clone.kind() else {
            panic!("unexpected kind: {clone:?}")
        };
        assert_eq!(e.reason(), "shard failure");
    }
}
