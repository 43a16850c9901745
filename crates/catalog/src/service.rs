//! Boundary to the remote catalog.

use crate::error::Result;
use async_trait::async_trait;
use encore_store::{CatalogBatch, CatalogRecord, SyncCursor};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Long-lived stream of incremental change sets, in the order the remote
/// catalog sends them.
pub type BatchStream = Pin<Box<dyn Stream<Item = Result<CatalogBatch>> + Send + 'static>>;

/// Shared handle to a catalog service.
pub type ServiceHandle = Arc<dyn CatalogService + Send + Sync>;

/// Client side of the remote catalog RPCs.
///
/// The transport (and its connection management) lives behind this trait.
/// Implementations report connection and stream failures as
/// [`ErrorKind::Transport`](crate::error::ErrorKind::Transport) so that
/// callers can decide whether to reconnect.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Open a pull stream resuming after `cursor`.
    ///
    /// Every batch carries the cursor to persist once it has been applied.
    /// The remote side may send any number of batches (including empty
    /// acknowledgment batches) and may end the stream at any time.
    async fn pull(&self, cursor: SyncCursor) -> Result<BatchStream>;

    /// One-shot snapshot of the whole remote catalog.
    async fn list(&self) -> Result<Vec<CatalogRecord>>;
}
