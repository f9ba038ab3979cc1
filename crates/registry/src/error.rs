//! Registry Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A uniqueness constraint rejected the write (e.g. a file name that was
    /// already uploaded for the package). Nothing was committed.
    #[display("conflicting record: {_0}")]
    Conflict(#[error(not(source))] String),
    /// The supplied version string does not parse.
    #[display("invalid version: {_0:?}")]
    InvalidVersion(#[error(not(source))] String),
    /// A stored or supplied value could not be converted.
    #[display("invalid registry data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classify a failed statement: constraint violations become [`Conflict`](Self::Conflict),
    /// anything else is a plain [`Database`](Self::Database) error. The driver
    /// error is kept as a child in the error tree.
    #[track_caller]
    pub(crate) fn from_sqlx(err: sqlx::Error, target: impl Into<String>) -> Error {
        let kind = match err.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::Conflict(target.into()),
            _ => Self::Database,
        };
        exn::Exn::from(err).raise(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_retryable() {
        assert!(ErrorKind::Conflict("foo/foo-1.0.tar.gz".to_string()).is_retryable());
        assert!(!ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::InvalidVersion("one".to_string()).is_retryable());
    }

    #[test]
    fn test_non_database_errors_are_not_conflicts() {
        let err = ErrorKind::from_sqlx(sqlx::Error::RowNotFound, "foo");
        assert_eq!(*err, ErrorKind::Database);
    }
}
