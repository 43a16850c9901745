//! Incremental synchronization from the remote catalog.

use crate::Catalog;
use crate::cache::{CatalogCache, CatalogView};
use crate::error::{Error, ErrorKind, Result};
use crate::service::CatalogService;
use encore_asyncutils::{Backoff, supervise};
use encore_store::{CatalogBatch, CatalogRecord, RecordStore, SearchIndex, SyncCursor};
use exn::ResultExt;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// Default bound on the one-shot listing call.
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Applies remote change sets to the record store, search index, and
/// catalog cache, in that order.
///
/// The record store is the source of truth: a batch is committed there
/// (records and cursor together) before anything derived is touched, and a
/// failure to update the search index is logged rather than unwinding the
/// commit. The engine is the only writer of all three, and applies one batch
/// at a time even when several runs share it.
#[derive(Debug)]
pub struct SyncEngine {
    store: RecordStore,
    index: SearchIndex,
    cache: CatalogCache,
    writer: Mutex<()>,
}

impl SyncEngine {
    /// Load every stored record into the catalog cache, without touching
    /// the network, so that listing works before the first sync completes.
    ///
    /// The search index is rebuilt from the store if it lags behind the
    /// store cursor or disagrees on the number of entries.
    #[instrument(skip_all)]
    pub async fn new(store: RecordStore, index: SearchIndex) -> Result<Self> {
        let records = store.load_all().await.or_raise(|| ErrorKind::Store)?;
        let cursor = store.cursor().await.or_raise(|| ErrorKind::Store)?;
        let indexed = index.len().await.or_raise(|| ErrorKind::Index)?;
        let index_cursor = index.cursor().await.or_raise(|| ErrorKind::Index)?;
        if index_cursor != cursor || indexed != records.len() as u64 {
            tracing::warn!(
                records = records.len(),
                indexed,
                cursor = %cursor,
                index_cursor = %index_cursor,
                "Search index out of step with record store"
            );
            index.rebuild(&records, cursor).await.or_raise(|| ErrorKind::Index)?;
        }
        tracing::info!(records = records.len(), "Catalog cache loaded from record store");
        Ok(Self { store, index, cache: CatalogCache::from_records(records), writer: Mutex::new(()) })
    }

    /// Read-only handle onto the catalog cache.
    pub fn view(&self) -> CatalogView {
        self.cache.view()
    }

    /// Listing and search facade for consumers.
    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.cache.view(), self.index.clone())
    }

    /// The cursor of the last fully applied batch.
    pub async fn cursor(&self) -> Result<SyncCursor> {
        self.store.cursor().await.or_raise(|| ErrorKind::Store)
    }

    /// Apply one batch.
    ///
    /// Fails (without changing anything) if the record store rejects the
    /// batch, e.g. because its cursor is behind the persisted one.
    #[instrument(skip_all, fields(cursor = %batch.cursor))]
    pub async fn apply(&self, batch: &CatalogBatch) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.store.apply_batch(batch).await.or_raise(|| ErrorKind::Store)?;
        if let Err(err) = self.index.apply_batch(batch).await {
            // Store already committed; the index cursor now lags it, so the
            // index gets rebuilt on next start.
            tracing::error!(cursor = %batch.cursor, error = ?err, "Failed to update search index");
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.cache.apply(&batch.added, &batch.removed);
        tracing::info!(
            cursor = %batch.cursor,
            added = batch.added.len(),
            removed = batch.removed.len(),
            "Applied catalog batch"
        );
        Ok(())
    }

    /// Resume from the persisted cursor and apply batches until the remote
    /// side ends the stream.
    ///
    /// Returns the cursor reached. Any stream error ends the run and is
    /// returned as-is; reconnecting is the caller's decision (see
    /// [`run_supervised`](Self::run_supervised)).
    #[instrument(skip_all, fields(service = service.name()))]
    pub async fn run(&self, service: &dyn CatalogService) -> Result<SyncCursor> {
        let mut cursor = self.cursor().await?;
        tracing::info!(cursor = %cursor, "Opening catalog pull stream");
        let mut batches = service.pull(cursor).await?;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            self.apply(&batch).await?;
            cursor = batch.cursor;
        }
        tracing::info!(cursor = %cursor, "Catalog pull stream ended");
        Ok(cursor)
    }

    /// [`run`](Self::run), restarted with backoff after transport failures.
    ///
    /// Every restart resumes from whatever cursor was last committed.
    /// Non-retryable failures (local storage) stop the loop immediately.
    pub async fn run_supervised(&self, service: &dyn CatalogService, backoff: &Backoff) -> Result<SyncCursor> {
        supervise(backoff, |err: &Error| err.is_retryable(), |attempt| async move {
            if attempt > 0 {
                tracing::info!(attempt, "Reconnecting to remote catalog");
            }
            self.run(service).await
        })
        .await
    }

    /// Fetch a full snapshot of the remote catalog, sorted by path.
    ///
    /// The snapshot is returned as-is and not applied to any local state.
    #[instrument(skip_all, fields(service = service.name(), timeout = ?timeout))]
    pub async fn fetch_listing(service: &dyn CatalogService, timeout: Duration) -> Result<Vec<CatalogRecord>> {
        let Ok(listing) = tokio::time::timeout(timeout, service.list()).await else {
            exn::bail!(ErrorKind::Timeout(timeout));
        };
        let mut listing = listing?;
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCatalogService, Step};
    use encore_store::{DEFAULT_LIMIT, Database};
    use std::sync::Arc;

    fn record(path: &str, artist: &str, title: &str) -> CatalogRecord {
        CatalogRecord {
            artist: artist.to_string(),
            album: "Singles".to_string(),
            title: title.to_string(),
            duration: "3:00".to_string(),
            ..CatalogRecord::new(path)
        }
    }

    fn batch(cursor: u64, added: Vec<CatalogRecord>, removed: &[&str]) -> CatalogBatch {
        CatalogBatch {
            cursor: SyncCursor(cursor),
            added,
            removed: removed.iter().map(|p| p.to_string()).collect(),
        }
    }

    async fn engine(db: &Database) -> SyncEngine {
        SyncEngine::new(RecordStore::from(db), SearchIndex::from(db)).await.unwrap()
    }

    fn paths(records: &[CatalogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_run_applies_batches_and_persists_cursor() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        let service = MockCatalogService::new().with_session([
            Step::Batch(batch(4, vec![record("b.mp3", "Low", "Words"), record("a.wav", "Low", "Lullaby")], &[])),
            // The remote catalog acknowledges with an empty batch.
            Step::Batch(batch(4, vec![], &[])),
        ]);

        let reached = engine.run(&service).await.unwrap();
        assert_eq!(reached, SyncCursor(4));
        assert_eq!(engine.cursor().await.unwrap(), SyncCursor(4));
        assert_eq!(service.pulls().await, vec![SyncCursor(0)]);
        assert_eq!(paths(&engine.view().list()), vec!["a.wav", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_cursor_and_preloads_cache() {
        let db = Database::connect_in_memory().await.unwrap();
        {
            let engine = engine(&db).await;
            engine.apply(&batch(9, vec![record("a.mp3", "Low", "Canada")], &[])).await.unwrap();
        }

        let engine = engine(&db).await;
        // Listing works before any network round-trip.
        assert_eq!(paths(&engine.view().list()), vec!["a.mp3"]);

        let service = MockCatalogService::new();
        engine.run(&service).await.unwrap();
        assert_eq!(service.pulls().await, vec![SyncCursor(9)]);
    }

    #[tokio::test]
    async fn test_reapplied_batch_keeps_one_record_per_path() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        let twice = batch(1, vec![record("a.mp3", "Low", "Sunflower")], &[]);
        engine.apply(&twice).await.unwrap();
        engine.apply(&twice).await.unwrap();

        assert_eq!(RecordStore::from(&db).len().await.unwrap(), 1);
        assert_eq!(SearchIndex::from(&db).len().await.unwrap(), 1);
        assert_eq!(engine.catalog().search("sunflower").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_removed_path_disappears_from_list_and_search() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        engine.apply(&batch(1, vec![record("a.mp3", "Low", "Monkey"), record("b.mp3", "Low", "Breaker")], &[])).await.unwrap();
        engine.apply(&batch(2, vec![], &["a.mp3"])).await.unwrap();

        let catalog = engine.catalog();
        assert_eq!(paths(&catalog.list()), vec!["b.mp3"]);
        assert!(catalog.search("monkey").await.unwrap().is_empty());
        assert_eq!(paths(&catalog.search("low").await.unwrap()), vec!["b.mp3"]);
        assert!(SearchIndex::from(&db).query("monkey", DEFAULT_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regressing_batch_fails_run_and_leaves_state() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        let service = MockCatalogService::new().with_session([
            Step::Batch(batch(10, vec![record("a.mp3", "Low", "Dinosaur Act")], &[])),
            Step::Batch(batch(3, vec![record("b.mp3", "Low", "Laser Beam")], &[])),
        ]);

        let err = engine.run(&service).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Store));
        assert!(!err.is_retryable());
        assert_eq!(engine.cursor().await.unwrap(), SyncCursor(10));
        assert!(engine.view().get("b.mp3").is_none());
    }

    #[tokio::test]
    async fn test_transport_error_keeps_applied_batches() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        let service = MockCatalogService::new().with_session([
            Step::Batch(batch(2, vec![record("a.mp3", "Low", "Especially Me")], &[])),
            Step::Fail("connection reset".to_string()),
        ]);

        let err = engine.run(&service).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport(_)));
        assert_eq!(engine.cursor().await.unwrap(), SyncCursor(2));
        assert_eq!(engine.view().len(), 1);
    }

    #[tokio::test]
    async fn test_supervised_run_reconnects_from_last_cursor() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        let service = MockCatalogService::new()
            .with_session([
                Step::Batch(batch(5, vec![record("a.mp3", "Low", "Plastic Cup")], &[])),
                Step::Fail("stream reset".to_string()),
            ])
            .with_session([Step::Fail("connection refused".to_string())])
            .with_session([Step::Batch(batch(6, vec![record("b.mp3", "Low", "Holy Ghost")], &[]))]);

        let backoff = Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2,
            max_attempts: Some(5),
        };
        let reached = engine.run_supervised(&service, &backoff).await.unwrap();
        assert_eq!(reached, SyncCursor(6));
        assert_eq!(service.pulls().await, vec![SyncCursor(0), SyncCursor(5), SyncCursor(5)]);
        assert_eq!(paths(&engine.view().list()), vec!["a.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_index_is_rebuilt_when_out_of_step() {
        let db = Database::connect_in_memory().await.unwrap();
        engine(&db).await.apply(&batch(1, vec![record("a.mp3", "Low", "Pissing")], &[])).await.unwrap();
        SearchIndex::from(&db).rebuild(&[], SyncCursor(1)).await.unwrap();

        let engine = engine(&db).await;
        assert_eq!(paths(&engine.catalog().search("pissing").await.unwrap()), vec!["a.mp3"]);
    }

    #[tokio::test]
    async fn test_lagging_index_is_rebuilt_even_when_counts_match() {
        let db = Database::connect_in_memory().await.unwrap();
        let first = engine(&db).await;
        first.apply(&batch(1, vec![record("a.mp3", "Low", "Words")], &[])).await.unwrap();

        // Take the index table away so the next update fails after the
        // store has committed.
        sqlx::query("ALTER TABLE search RENAME TO search_parked").execute(db.pool()).await.unwrap();
        first.apply(&batch(2, vec![record("a.mp3", "Low", "Lullaby")], &[])).await.unwrap();
        sqlx::query("ALTER TABLE search_parked RENAME TO search").execute(db.pool()).await.unwrap();

        assert_eq!(first.view().get("a.mp3").unwrap().title, "Lullaby");
        assert!(first.catalog().search("lullaby").await.unwrap().is_empty());
        assert_eq!(SearchIndex::from(&db).len().await.unwrap(), 1);
        assert_eq!(SearchIndex::from(&db).cursor().await.unwrap(), SyncCursor(1));
        drop(first);

        let engine = engine(&db).await;
        assert_eq!(paths(&engine.catalog().search("lullaby").await.unwrap()), vec!["a.mp3"]);
        assert!(engine.catalog().search("words").await.unwrap().is_empty());
        assert_eq!(SearchIndex::from(&db).cursor().await.unwrap(), SyncCursor(2));
    }

    #[tokio::test]
    async fn test_acknowledgment_keeps_index_in_step() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = engine(&db).await;
        engine.apply(&batch(1, vec![record("a.mp3", "Low", "Words")], &[])).await.unwrap();
        engine.apply(&batch(2, vec![], &[])).await.unwrap();
        assert_eq!(SearchIndex::from(&db).cursor().await.unwrap(), SyncCursor(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_applies_leave_cache_matching_store() {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = Arc::new(engine(&db).await);
        for round in 0..20u64 {
            let path = format!("track-{round}.mp3");
            let add = batch(2 * round + 1, vec![record(&path, "Low", "Murderer")], &[]);
            let remove = batch(2 * round + 2, vec![], &[path.as_str()]);
            let adding = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.apply(&add).await }
            });
            let removing = tokio::spawn({
                let engine = Arc::clone(&engine);
                async move { engine.apply(&remove).await }
            });
            // Whichever lands second may be refused as a regression; either
            // way the derived state must follow the store.
            _ = adding.await.unwrap();
            _ = removing.await.unwrap();

            let stored = RecordStore::from(&db).load_all().await.unwrap();
            assert_eq!(engine.view().list(), stored);
            let hits = SearchIndex::from(&db).query("murderer", DEFAULT_LIMIT).await.unwrap();
            assert_eq!(hits, stored.iter().map(|r| r.path.clone()).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_fetch_listing_sorts_snapshot() {
        let service = MockCatalogService::new().with_listing([record("z.mp3", "A", "Z"), record("a.mp3", "A", "A")]);
        let listing = SyncEngine::fetch_listing(&service, LISTING_TIMEOUT).await.unwrap();
        assert_eq!(paths(&listing), vec!["a.mp3", "z.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_listing_times_out() {
        let service = MockCatalogService::new().with_listing_delay(Duration::from_secs(600));
        let err = SyncEngine::fetch_listing(&service, LISTING_TIMEOUT).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Timeout(LISTING_TIMEOUT));
    }
}
