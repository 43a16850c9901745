//! Scripted, in-process catalog service for testing.

use crate::error::{ErrorKind, Result};
use crate::service::{BatchStream, CatalogService};
use async_stream::stream;
use async_trait::async_trait;
use encore_store::{CatalogBatch, CatalogRecord, SyncCursor};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted event on a pull stream.
#[derive(Debug, Clone)]
pub enum Step {
    Batch(CatalogBatch),
    /// Break the stream with a transport error.
    Fail(String),
}

/// Catalog service that replays scripted pull sessions.
///
/// Every call to [`pull`](CatalogService::pull) consumes the next scripted
/// session; once they run out, pulls yield an empty stream. The cursors
/// clients resumed from are recorded for inspection.
#[derive(Debug, Default)]
pub struct MockCatalogService {
    sessions: Mutex<VecDeque<Vec<Step>>>,
    pulls: Mutex<Vec<SyncCursor>>,
    listing: Vec<CatalogRecord>,
    listing_delay: Option<Duration>,
}

impl MockCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next pull session.
    pub fn with_session(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.sessions.get_mut().push_back(steps.into_iter().collect());
        self
    }

    /// Records returned by [`list`](CatalogService::list).
    pub fn with_listing(mut self, records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        self.listing = records.into_iter().collect();
        self
    }

    /// Make [`list`](CatalogService::list) take this long to answer.
    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = Some(delay);
        self
    }

    /// Cursors sent by every pull so far, in call order.
    pub async fn pulls(&self) -> Vec<SyncCursor> {
        self.pulls.lock().await.clone()
    }
}

#[async_trait]
impl CatalogService for MockCatalogService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn pull(&self, cursor: SyncCursor) -> Result<BatchStream> {
        self.pulls.lock().await.push(cursor);
        let steps = self.sessions.lock().await.pop_front().unwrap_or_default();
        Ok(Box::pin(stream! {
            for step in steps {
                match step {
                    Step::Batch(batch) => yield Ok(batch),
                    Step::Fail(reason) => {
                        yield Err(exn::Exn::from(ErrorKind::Transport(reason)));
                        return;
                    },
                }
            }
        }))
    }

    async fn list(&self) -> Result<Vec<CatalogRecord>> {
        if let Some(delay) = self.listing_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.listing.clone())
    }
}
