//! Download-while-playing.
//!
//! [`DownloadCoordinator::ensure_local`] turns a catalog path into a
//! [`StreamingReader`]: served from the blob cache when the track is already
//! there, otherwise fed by a background download that lands each chunk in a
//! working file before the reader is allowed to see it.

mod download;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod progress;
mod reader;
mod service;
mod trailer;

pub use crate::download::{DownloadCoordinator, READY_CHUNKS};
pub use crate::reader::{ReaderStats, StreamingReader};
pub use crate::service::{BlobService, BlobServiceHandle, ChunkStream};
pub use crate::trailer::trailing_len;
