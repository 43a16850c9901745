//! Boundary to the remote blob service.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Opaque byte chunks of one track, in file order, ending at end-of-stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send + 'static>>;

/// Shared handle to a blob service.
pub type BlobServiceHandle = Arc<dyn BlobService + Send + Sync>;

/// Client side of the remote blob download RPC.
///
/// Connection and stream failures are reported as
/// [`ErrorKind::Transport`](crate::error::ErrorKind::Transport).
#[async_trait]
pub trait BlobService: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Start downloading the track at `path`.
    async fn download(&self, path: &str) -> Result<ChunkStream>;
}
