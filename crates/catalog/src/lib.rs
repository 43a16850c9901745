//! Local mirror of the remote catalog.
//!
//! The [`SyncEngine`] pulls incremental change sets from a
//! [`CatalogService`] and applies them to the durable record store, the
//! search index, and an in-memory [`CatalogCache`]. Consumers read through a
//! [`Catalog`] (listing and search) or a bare [`CatalogView`], neither of
//! which can mutate anything.

mod cache;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod service;
mod sync;

pub use crate::cache::{CatalogCache, CatalogView};
pub use crate::service::{BatchStream, CatalogService, ServiceHandle};
pub use crate::sync::{LISTING_TIMEOUT, SyncEngine};
pub use encore_store::{CatalogBatch, CatalogRecord, SyncCursor};

use crate::error::{ErrorKind, Result};
use encore_store::{DEFAULT_LIMIT, SearchIndex};
use exn::ResultExt;

/// Read-only listing and search over the catalog mirror.
#[derive(Debug, Clone)]
pub struct Catalog {
    view: CatalogView,
    index: SearchIndex,
}

impl Catalog {
    pub fn new(view: CatalogView, index: SearchIndex) -> Self {
        Self { view, index }
    }

    /// Every known record, sorted by path.
    pub fn list(&self) -> Vec<CatalogRecord> {
        self.view.list()
    }

    pub fn get(&self, path: &str) -> Option<CatalogRecord> {
        self.view.get(path)
    }

    /// Records matching a free-text query, best match first.
    pub async fn search(&self, query: &str) -> Result<Vec<CatalogRecord>> {
        self.search_with_limit(query, DEFAULT_LIMIT).await
    }

    /// Like [`search`](Self::search) with an explicit cap on the hit count.
    ///
    /// Hits whose path is no longer in the catalog cache (removed since they
    /// were indexed) are skipped.
    pub async fn search_with_limit(&self, query: &str, limit: u32) -> Result<Vec<CatalogRecord>> {
        let paths = self.index.query(query, limit).await.or_raise(|| ErrorKind::Index)?;
        Ok(self.view.resolve(paths))
    }
}
