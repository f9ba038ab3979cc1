//! Version Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A version error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for version operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The string does not follow the version grammar, or one of its numeric
    /// segments does not fit into 64 bits (the integer error is the child).
    #[display("invalid version: {_0:?}")]
    InvalidVersion(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // A version string is either valid or it isn't.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidVersion("1..0".to_string()).to_string(), "invalid version: \"1..0\"");
    }

    #[test]
    fn error_kind_never_retryable() {
        assert!(!ErrorKind::InvalidVersion(String::new()).is_retryable());
    }
}
