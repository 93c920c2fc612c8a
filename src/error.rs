//! Crate-wide error type.

use std::fmt;

/// PiGuard result type.
pub type Result<T> = std::result::Result<T, Error>;

/// A PiGuard error.
#[derive(Debug)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Additional detail, where the kind alone does not name the failing path.
    pub message: String,
}

/// PiGuard error kind.
#[derive(Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum ErrorKind {
    /// database could not be opened at '{0}'
    StoreOpen(String),
    /// database schema migration failed
    Migration,
    /// database query failed
    Query,
    /// configuration could not be read from '{0}'
    ConfigRead(String),
    /// configuration is invalid: {0}
    ConfigInvalid(String),
    /// radio control operation failed on interface '{0}'
    RadioControl(String),
    /// capture source error
    Capture,
    /// internal I/O error
    Io,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::with_message(ErrorKind::Query, err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::with_message(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::with_message(ErrorKind::ConfigInvalid(String::new()), err.to_string())
    }
}
