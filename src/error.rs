//! Client Error Types

use derive_more::{Display, Error};

/// A client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which part of the client failed.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    /// The data directory, database or blob cache could not be opened.
    #[display("local storage unavailable")]
    Storage,
    #[display("catalog error")]
    Catalog,
    #[display("playback error")]
    Playback,
}
