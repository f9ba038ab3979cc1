//! Blob storage errors.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong with a blob operation, in terms the index can act on:
/// [`NotFound`](Self::NotFound) is an answer, the rest are failures.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No blob at this path.
    #[display("no blob at {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The backend refused the operation (filesystem permissions, bucket
    /// policy, or an injected failure in the mock backend).
    #[display("storage refused access to {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Local filesystem failure.
    #[display("filesystem error: {_0}")]
    Io(IoError),
    /// The object store could not be reached or timed out.
    #[display("object store unreachable: {_0}")]
    Network(#[error(not(source))] String),
    /// Rejected by [`validate_path`](crate::validate_path).
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Any other failure reported by the object store.
    #[display("object store error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Transient failures, worth another attempt by the client.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}
