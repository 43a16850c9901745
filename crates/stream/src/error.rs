//! Streaming Error Types

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A streaming error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The download could not be started or broke off.
    #[display("blob transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The blob cache could not be read or written.
    #[display("blob cache error")]
    Cache,
    /// The working file could not be created or written.
    #[display("working file I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}
