//! Playback Error Types

use derive_more::{Display, Error};

/// A playback error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for playback operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The track could not be fetched from the cache or the blob service.
    #[display("could not fetch track")]
    Fetch,
    /// No decoder handles files with this extension.
    #[display("unsupported audio format: {_0:?}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The container or codec could not be decoded.
    #[display("decode error: {_0}")]
    Decode(#[error(not(source))] String),
    /// Repositioning the decoder failed; playback position is undefined.
    #[display("seek failed: {_0}")]
    Seek(#[error(not(source))] String),
    /// The audio output device could not be opened or written.
    #[display("audio output error: {_0}")]
    Output(#[error(not(source))] String),
    /// The operation needs a loaded track.
    #[display("no track loaded")]
    NothingLoaded,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch | Self::Output(_))
    }
}
