//! Catalog Error Types

use derive_more::{Display, Error};
use std::time::Duration;

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection to the remote catalog failed or the stream broke.
    #[display("catalog transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The remote catalog did not answer in time.
    #[display("catalog request timed out after {_0:?}")]
    Timeout(#[error(not(source))] Duration),
    /// Local persistence (record store) failed.
    #[display("catalog store error")]
    Store,
    /// The search index could not be read or written.
    #[display("search index error")]
    Index,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transport(_) | ErrorKind::Timeout(_))
    }
}
