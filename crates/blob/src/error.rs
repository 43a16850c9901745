//! Blob Cache Error Types

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A blob cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for blob cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// A missing entry is not an error: lookups return `Option`.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Access denied to the cache directory or an entry.
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Cache root is not an absolute directory path.
    #[display("invalid cache directory: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    pub(crate) fn from_io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
