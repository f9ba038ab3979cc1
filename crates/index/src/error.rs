//! Index Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors from the storage backend and
//! the release store are kept as children of the kind raised here.

use derive_more::{Display, Error};

/// An index error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an index failure.
///
/// ### Caller Errors
/// - [`ErrorKind::InvalidInput`]
/// - [`ErrorKind::ReadOnly`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Metadata`]
/// - [`ErrorKind::Conflict`] - a metadata error the caller may retry.
/// - [`ErrorKind::Render`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before any storage or metadata work.
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
    /// A blob storage operation failed.
    #[display("storage error during {operation} of {target}")]
    Storage { operation: &'static str, target: String },
    /// A release store operation failed.
    #[display("metadata error during {operation} of {target}")]
    Metadata { operation: &'static str, target: String },
    /// A concurrent or repeated write collided with an existing record.
    #[display("conflict during {operation} of {target}")]
    Conflict { operation: &'static str, target: String },
    /// The index has no metadata database and cannot accept uploads.
    #[display("index is read-only")]
    ReadOnly,
    /// A simple-index page could not be rendered.
    #[display("failed to render simple index")]
    Render,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn storage(operation: &'static str, target: impl Into<String>) -> Self {
        Self::Storage { operation, target: target.into() }
    }

    /// Metadata failures keep the release store's own classification: a
    /// conflicting record stays distinguishable so callers can retry.
    pub(crate) fn metadata(
        source: &wheelhouse_registry::error::ErrorKind,
        operation: &'static str,
        target: impl Into<String>,
    ) -> Self {
        use wheelhouse_registry::error::ErrorKind as RegistryErrorKind;
        let target = target.into();
        match source {
            RegistryErrorKind::Conflict(_) => Self::Conflict { operation, target },
            RegistryErrorKind::InvalidVersion(version) => Self::InvalidInput(format!("invalid version {version:?}")),
            _ => Self::Metadata { operation, target },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wheelhouse_registry::error::ErrorKind as RegistryErrorKind;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(ErrorKind::Conflict { operation: "upload", target: "foo".into() }.is_retryable());
        assert!(!ErrorKind::storage("upload", "foo").is_retryable());
        assert!(!ErrorKind::ReadOnly.is_retryable());
    }

    #[test]
    fn test_metadata_classification() {
        let conflict = ErrorKind::metadata(&RegistryErrorKind::Conflict("foo/a".into()), "upload", "foo");
        assert!(matches!(conflict, ErrorKind::Conflict { .. }));
        let database = ErrorKind::metadata(&RegistryErrorKind::Database, "upload", "foo");
        assert_eq!(database, ErrorKind::Metadata { operation: "upload", target: "foo".into() });
        let version = ErrorKind::metadata(&RegistryErrorKind::InvalidVersion("x".into()), "upload", "foo");
        assert!(matches!(version, ErrorKind::InvalidInput(_)));
    }

    #[test]
    fn test_display() {
        let err = ErrorKind::storage("download", "foo/foo-1.0.tar.gz");
        assert_eq!(err.to_string(), "storage error during download of foo/foo-1.0.tar.gz");
    }
}
