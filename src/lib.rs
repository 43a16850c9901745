//! Client-side core of a personal media library.
//!
//! A [`Client`] ties the pieces together for one data directory: the SQLite
//! catalog mirror kept current by the sync engine, the blob cache with its
//! download coordinator, and the playback engine with a play queue on top.
//! Remote services and the audio output are injected, so the same wiring
//! runs against real transports or the in-process mocks.

pub mod error;

pub use encore_catalog::{Catalog, CatalogRecord, CatalogService, ServiceHandle, SyncCursor};
pub use encore_config::Config;
pub use encore_playback::{AudioOutput, MemoryOutput, Meta, PlaybackEngine, Playlist, Progress, Report};
pub use encore_stream::{BlobService, BlobServiceHandle};

use crate::error::{ErrorKind, Result};
use encore_asyncutils::Backoff;
use encore_blob::BlobCache;
use encore_catalog::SyncEngine;
use encore_config::BackoffConfig;
use encore_store::{Database, RecordStore, SearchIndex};
use encore_stream::DownloadCoordinator;
use exn::ResultExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Reconnect policy for the sync loop, from its configuration.
pub fn backoff(config: &BackoffConfig) -> Backoff {
    Backoff {
        initial: config.initial(),
        max: config.max(),
        multiplier: config.multiplier,
        max_attempts: config.max_attempts,
    }
}

pub struct Client {
    config: Config,
    database: Database,
    sync: SyncEngine,
    catalog_service: ServiceHandle,
    engine: PlaybackEngine,
    queue: Mutex<Playlist>,
}

impl Client {
    /// Open (or create) the library under `config.storage.data_dir`.
    ///
    /// The catalog is listable as soon as this returns, from whatever was
    /// synced before; nothing is fetched from the network.
    #[instrument(skip_all, fields(data_dir = %config.storage.data_dir.display()))]
    pub async fn open(
        config: Config,
        catalog_service: ServiceHandle,
        blob_service: BlobServiceHandle,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let storage = &config.storage;
        for dir in [&storage.data_dir, &storage.scratch_dir()] {
            tokio::fs::create_dir_all(dir).await.or_raise(|| ErrorKind::Storage)?;
        }

        let database = Database::connect(storage.database_path()).await.or_raise(|| ErrorKind::Storage)?;
        let sync = SyncEngine::new(RecordStore::from(&database), SearchIndex::from(&database))
            .await
            .or_raise(|| ErrorKind::Catalog)?;

        let cache = BlobCache::open(storage.blob_dir()).or_raise(|| ErrorKind::Storage)?;
        let coordinator = DownloadCoordinator::new(cache, blob_service)
            .with_ready_chunks(config.playback.ready_chunks)
            .with_scratch_dir(storage.scratch_dir());
        let engine = PlaybackEngine::new(coordinator, output).with_tick_interval(config.playback.tick_interval());

        tracing::info!(server = %config.server.address, "Library opened");
        Ok(Self {
            config,
            database,
            sync,
            catalog_service,
            engine,
            queue: Mutex::new(Playlist::new(Vec::<String>::new())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Listing and search over the local catalog mirror.
    pub fn catalog(&self) -> Catalog {
        self.sync.catalog()
    }

    pub fn playback(&self) -> &PlaybackEngine {
        &self.engine
    }

    /// Pull changes until the remote side ends the stream.
    pub async fn sync_once(&self) -> Result<SyncCursor> {
        self.sync.run(self.catalog_service.as_ref()).await.or_raise(|| ErrorKind::Catalog)
    }

    /// Pull changes, reconnecting with the configured backoff after
    /// transport failures.
    pub async fn sync(&self) -> Result<SyncCursor> {
        let backoff = backoff(&self.config.sync.backoff);
        self.sync
            .run_supervised(self.catalog_service.as_ref(), &backoff)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    /// A full snapshot of the remote catalog, without touching local state.
    pub async fn fetch_listing(&self) -> Result<Vec<CatalogRecord>> {
        SyncEngine::fetch_listing(self.catalog_service.as_ref(), self.config.sync.listing_timeout())
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    /// Replace the play queue. Playback is not affected until the next
    /// [`play_next`](Self::play_next).
    pub fn enqueue(&self, playlist: Playlist) {
        *self.queue.lock() = playlist;
    }

    /// The track the queue is on, if any.
    pub fn queued(&self) -> Option<String> {
        self.queue.lock().current().map(str::to_string)
    }

    /// Play `path` from the start, moving the queue to it if it is queued.
    pub async fn play(&self, path: &str) -> Result<()> {
        self.queue.lock().select(path);
        let volume = self.engine.volume().unwrap_or(self.config.playback.volume);
        self.engine.load_track(path, volume, 0).await.or_raise(|| ErrorKind::Playback)
    }

    /// Advance the queue and play the track it lands on.
    ///
    /// Returns the path now playing, or `None` once the queue is exhausted.
    pub async fn play_next(&self) -> Result<Option<String>> {
        let Some(next) = self.queue.lock().advance().map(str::to_string) else {
            return Ok(None);
        };
        let volume = self.engine.volume().unwrap_or(self.config.playback.volume);
        self.engine.load_track(&next, volume, 0).await.or_raise(|| ErrorKind::Playback)?;
        Ok(Some(next))
    }

    /// Play the next queued track whenever one ends.
    ///
    /// Runs until the client is dropped or the returned task is aborted.
    pub fn autoplay(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::downgrade(self);
        let mut updates = self.engine.subscribe();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let Report::Ended { path, failed } = updates.borrow_and_update().clone() else {
                    continue;
                };
                let Some(client) = client.upgrade() else {
                    break;
                };
                if failed {
                    tracing::warn!(%path, "Track failed; moving on");
                }
                match client.play_next().await {
                    Ok(Some(next)) => tracing::debug!(ended = %path, next = %next, "Autoplay advanced"),
                    Ok(None) => tracing::debug!(ended = %path, "Play queue finished"),
                    Err(err) => tracing::error!(error = ?err, "Autoplay could not start the next track"),
                }
            }
        })
    }

    /// Stop playback and close the database.
    pub async fn close(&self) {
        self.engine.stop().await;
        self.database.close().await;
    }
}
