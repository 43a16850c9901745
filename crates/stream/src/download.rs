//! Resolve a track to a byte source: from the blob cache, or by downloading it.

use crate::error::{ErrorKind, Result};
use crate::progress::Progress;
use crate::reader::StreamingReader;
use crate::service::{BlobServiceHandle, ChunkStream};
use crate::trailer::trailing_len;
use encore_blob::{BlobCache, BlobKey, PartialEntry};
use exn::ResultExt;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::instrument;

/// Chunks that must land before a downloading track is handed out.
///
/// Gives the decoder something to probe instead of blocking on its very
/// first read.
pub const READY_CHUNKS: u32 = 3;

/// A download under way: its working file and how far it has got.
#[derive(Clone)]
struct InFlight {
    working: Arc<NamedTempFile>,
    progress: Arc<Progress>,
}

type Registry = Arc<Mutex<HashMap<BlobKey, InFlight>>>;

/// Outcome of looking a key up in the registry.
enum Claim {
    Joined(StreamingReader),
    /// The blob landed in the cache since it was last checked.
    Cached,
    Started(StreamingReader, InFlight),
}

/// Serves tracks from the [`BlobCache`], downloading (and caching) the ones
/// it does not have yet.
///
/// At most one download per track runs at a time: asking for a track that
/// is already downloading returns another reader over the same working file.
#[derive(Clone)]
pub struct DownloadCoordinator {
    cache: BlobCache,
    service: BlobServiceHandle,
    ready_chunks: u32,
    scratch: PathBuf,
    in_flight: Registry,
}

impl DownloadCoordinator {
    pub fn new(cache: BlobCache, service: BlobServiceHandle) -> Self {
        Self {
            cache,
            service,
            ready_chunks: READY_CHUNKS,
            scratch: std::env::temp_dir(),
            in_flight: Registry::default(),
        }
    }

    /// Override the number of chunks to wait for before a download is
    /// handed out (minimum 1).
    pub fn with_ready_chunks(mut self, chunks: u32) -> Self {
        self.ready_chunks = chunks.max(1);
        self
    }

    /// Directory for working files of in-flight downloads.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = dir.into();
        self
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    /// Number of downloads currently under way.
    pub fn downloads_in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// A byte source for the track at `path`.
    ///
    /// A cached track is served from memory without contacting the blob
    /// service. Otherwise a download is started in the background, writing
    /// every chunk to a working file (which the returned reader follows)
    /// and to a partial cache entry, which is promoted once the download
    /// completes or deleted if it fails. The reader is returned once the
    /// first few chunks have landed; a failure before that is returned
    /// instead.
    #[instrument(skip(self), fields(service = self.service.name()))]
    pub async fn ensure_local(&self, path: &str) -> Result<StreamingReader> {
        let key = BlobKey::for_path(path);
        let (reader, download) = loop {
            if let Some(data) = self.cache.read(&key).await.or_raise(|| ErrorKind::Cache)? {
                tracing::debug!(key = %key, bytes = data.len(), "Serving track from blob cache");
                return Ok(StreamingReader::from_static(data));
            }
            match self.claim(&key)? {
                Claim::Joined(reader) => return Ok(reader),
                Claim::Started(reader, download) => break (reader, download),
                Claim::Cached => tracing::debug!(key = %key, "Download finished meanwhile; reading cache again"),
            }
        };

        tracing::info!(key = %key, "Track not cached; downloading");
        let (chunks, writer, entry) = match self.start(path, &key, &download).await {
            Ok(started) => started,
            Err(err) => {
                download.progress.fail((*err).to_string());
                self.in_flight.lock().remove(&key);
                return Err(err);
            },
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = Download {
            path: path.to_string(),
            key,
            writer,
            download,
            registry: Arc::clone(&self.in_flight),
            ready_chunks: self.ready_chunks,
            ready: Some(ready_tx),
        };
        tokio::spawn(task.run(chunks, entry));

        match ready_rx.await {
            Ok(Ok(())) => Ok(reader),
            Ok(Err(err)) => Err(err),
            Err(_) => exn::bail!(ErrorKind::Transport("download stopped before the track was ready".to_string())),
        }
    }

    /// Join the download of `key` or register a new one.
    ///
    /// Downloads commit their blob before leaving the registry, so a blob
    /// seen here under the registry lock is complete and must not be
    /// fetched again.
    fn claim(&self, key: &BlobKey) -> Result<Claim> {
        let mut in_flight = self.in_flight.lock();
        if let Some(download) = in_flight.get(key) {
            tracing::debug!(key = %key, "Joining download already in flight");
            let reader = StreamingReader::downloading(Arc::clone(&download.working), Arc::clone(&download.progress))
                .map_err(ErrorKind::Io)?;
            return Ok(Claim::Joined(reader));
        }
        if self.cache.path_of(key).is_file() {
            return Ok(Claim::Cached);
        }
        let working = tempfile::Builder::new()
            .prefix("encore-download-")
            .tempfile_in(&self.scratch)
            .map_err(ErrorKind::Io)?;
        let download = InFlight { working: Arc::new(working), progress: Arc::new(Progress::new()) };
        let reader = StreamingReader::downloading(Arc::clone(&download.working), Arc::clone(&download.progress))
            .map_err(ErrorKind::Io)?;
        in_flight.insert(*key, download.clone());
        Ok(Claim::Started(reader, download))
    }

    async fn start(&self, path: &str, key: &BlobKey, download: &InFlight) -> Result<(ChunkStream, File, PartialEntry)> {
        let chunks = self.service.download(path).await?;
        let writer = File::from_std(download.working.reopen().map_err(ErrorKind::Io)?);
        let entry = self.cache.begin(key).await.or_raise(|| ErrorKind::Cache)?;
        Ok((chunks, writer, entry))
    }
}

/// Background half of a cache miss.
struct Download {
    path: String,
    key: BlobKey,
    writer: File,
    /// Keeps the working file alive until the download is over.
    download: InFlight,
    registry: Registry,
    ready_chunks: u32,
    ready: Option<oneshot::Sender<Result<()>>>,
}

impl Download {
    /// Tell `ensure_local` how things went, if it is still waiting.
    fn signal(&mut self, outcome: Result<()>) -> std::result::Result<(), Result<()>> {
        match self.ready.take() {
            Some(ready) => ready.send(outcome),
            None => Err(outcome),
        }
    }

    #[instrument(name = "download", skip_all, fields(path = %self.path))]
    async fn run(mut self, mut chunks: ChunkStream, mut entry: PartialEntry) {
        match self.pump(&mut chunks, &mut entry).await {
            Ok(bytes) => self.complete(entry, bytes).await,
            Err(err) => {
                if let Err(abort) = entry.abort().await {
                    tracing::warn!(error = ?abort, "Failed to discard partial blob");
                }
                self.download.progress.fail((*err).to_string());
                self.registry.lock().remove(&self.key);
                if let Err(Err(err)) = self.signal(Err(err)) {
                    tracing::error!(error = ?err, "Download failed mid-stream");
                }
            },
        }
    }

    /// Land every chunk: working file first (synced), then the cache entry,
    /// then the high-water mark.
    async fn pump(&mut self, chunks: &mut ChunkStream, entry: &mut PartialEntry) -> Result<u64> {
        let mut offset = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            self.writer.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
            self.writer.write_all(&chunk).await.map_err(ErrorKind::Io)?;
            self.writer.sync_data().await.map_err(ErrorKind::Io)?;
            entry.append(&chunk).await.or_raise(|| ErrorKind::Cache)?;
            offset += chunk.len() as u64;
            let landed = self.download.progress.advance(offset);
            tracing::trace!(offset, landed, "Chunk landed");
            if landed >= self.ready_chunks {
                _ = self.signal(Ok(()));
            }
        }
        Ok(offset)
    }

    async fn complete(mut self, entry: PartialEntry, bytes: u64) {
        let blob = match entry.commit().await {
            Ok(blob) => blob,
            Err(err) => {
                self.download.progress.fail("failed to promote the downloaded blob".to_string());
                self.registry.lock().remove(&self.key);
                _ = self.signal(Err(err.raise(ErrorKind::Cache)));
                return;
            },
        };
        let probe = blob.clone();
        let trailing = tokio::task::spawn_blocking(move || std::fs::File::open(&probe).and_then(|mut f| trailing_len(&mut f)))
            .await
            .unwrap_or_else(|join| Err(std::io::Error::other(join)))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Could not inspect downloaded blob for trailing metadata");
                0
            });
        tracing::info!(bytes, trailing, "Download complete");
        self.download.progress.finish(blob, trailing);
        self.registry.lock().remove(&self.key);
        _ = self.signal(Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBlobService;
    use std::io::{Read, Seek};
    use std::time::Duration;

    fn track(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn coordinator(dir: &tempfile::TempDir, service: MockBlobService) -> (DownloadCoordinator, Arc<MockBlobService>) {
        let service = Arc::new(service);
        let cache = BlobCache::open(dir.path().join("blobs")).unwrap();
        let coordinator = DownloadCoordinator::new(cache, service.clone()).with_scratch_dir(dir.path());
        (coordinator, service)
    }

    async fn blocking_read(mut reader: StreamingReader, len: usize) -> (Vec<u8>, StreamingReader) {
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let n = reader.read(&mut buf).unwrap();
            buf.truncate(n);
            (buf, reader)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, service) = coordinator(&dir, MockBlobService::with_tracks([("a.mp3", track(10))]));
        coordinator.cache().put(&BlobKey::for_path("a.mp3"), b"cached bytes").await.unwrap();

        let mut reader = coordinator.ensure_local("a.mp3").await.unwrap();
        assert_eq!(service.calls(), 0);
        assert_eq!(reader.state(), "static");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"cached bytes");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_miss_downloads_caches_and_serves_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = track(10_000);
        let service = MockBlobService::with_tracks([("a.wav", data.clone())]).with_chunk_size(1_000);
        let (coordinator, service) = coordinator(&dir, service);

        let reader = coordinator.ensure_local("a.wav").await.unwrap();
        assert!(service.chunks_sent() >= 3);
        let out = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(reader.state(), "finished");
            out
        })
        .await
        .unwrap();
        assert_eq!(out, data);

        let key = BlobKey::for_path("a.wav");
        assert_eq!(coordinator.cache().read(&key).await.unwrap().unwrap(), data);
        let again = coordinator.ensure_local("a.wav").await.unwrap();
        assert_eq!(again.state(), "static");
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_never_runs_ahead_of_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let data = track(1_000);
        let (service, gate) = MockBlobService::with_tracks([("a.mp3", data.clone())]).with_chunk_size(100).gated();
        let (coordinator, _service) = coordinator(&dir, service);

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.ensure_local("a.mp3").await }
        });
        gate.release(2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished(), "handed out before three chunks landed");
        gate.release(1);
        let reader = pending.await.unwrap().unwrap();
        assert_eq!(reader.size(), 300);
        assert!(reader.stats().is_downloading());

        let (first, reader) = blocking_read(reader, 4_096).await;
        assert_eq!(first, data[..300]);

        let next = tokio::spawn(blocking_read(reader, 4_096));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!next.is_finished(), "read returned bytes that were never written");
        gate.release(1);
        let (second, reader) = next.await.unwrap();
        assert_eq!(second, data[300..400]);

        gate.release(6);
        let finished = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).unwrap();
            reader.seek(std::io::SeekFrom::Start(0)).unwrap();
            let mut all = Vec::new();
            reader.read_to_end(&mut all).unwrap();
            (rest, all)
        })
        .await
        .unwrap();
        assert_eq!(finished.0, data[400..]);
        assert_eq!(finished.1, data);
    }

    #[tokio::test]
    async fn test_failure_before_ready_is_returned_and_nothing_cached() {
        let dir = tempfile::tempdir().unwrap();
        let service = MockBlobService::with_tracks([("a.mp3", track(1_000))]).with_chunk_size(100).with_failure_after(1);
        let (coordinator, _service) = coordinator(&dir, service);

        let err = coordinator.ensure_local("a.mp3").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Transport(_)));
        assert!(err.is_retryable());
        assert!(coordinator.cache().entries().await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(coordinator.cache().root()).unwrap().count(), 0);
        assert_eq!(coordinator.downloads_in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_request_joins_the_running_download() {
        let dir = tempfile::tempdir().unwrap();
        let data = track(1_000);
        let (service, gate) = MockBlobService::with_tracks([("a.mp3", data.clone())]).with_chunk_size(100).gated();
        let (coordinator, service) = coordinator(&dir, service);

        gate.release(3);
        let first = coordinator.ensure_local("a.mp3").await.unwrap();
        assert_eq!(coordinator.downloads_in_flight(), 1);
        let mut second = coordinator.ensure_local("a.mp3").await.unwrap();
        assert_eq!(service.calls(), 1);
        assert_eq!(second.state(), "downloading");
        // Readers are independent: dropping one leaves the working file for the other.
        drop(first);

        gate.release(7);
        let out = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            second.read_to_end(&mut out).unwrap();
            out
        })
        .await
        .unwrap();
        assert_eq!(out, data);
        // The registry entry goes just after the reader sees completion.
        for _ in 0..100 {
            if coordinator.downloads_in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.downloads_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_blob_landing_after_cache_miss_is_not_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, service) = coordinator(&dir, MockBlobService::with_tracks([("a.mp3", track(1_000))]));
        let key = BlobKey::for_path("a.mp3");
        assert!(!coordinator.cache().contains(&key).await.unwrap());

        // A download commits between the cache read and the registry lookup.
        coordinator.cache().put(&key, &track(1_000)).await.unwrap();
        assert!(matches!(coordinator.claim(&key).unwrap(), Claim::Cached));
        assert_eq!(coordinator.downloads_in_flight(), 0);
        assert_eq!(service.calls(), 0);
        assert_eq!(std::fs::read(coordinator.cache().path_of(&key)).unwrap(), track(1_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_racing_a_completing_download_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = track(2_000);
        let service = MockBlobService::with_tracks([("a.mp3", data.clone())]).with_chunk_size(100);
        let (coordinator, service) = coordinator(&dir, service);

        let requests: Vec<_> = (0..32)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(i * 50)).await;
                    let reader = coordinator.ensure_local("a.mp3").await.unwrap();
                    tokio::task::spawn_blocking(move || {
                        let mut reader = reader;
                        let mut out = Vec::new();
                        reader.read_to_end(&mut out).unwrap();
                        out
                    })
                    .await
                    .unwrap()
                })
            })
            .collect();
        for request in requests {
            assert_eq!(request.await.unwrap(), data);
        }
        assert_eq!(service.calls(), 1);
        assert_eq!(std::fs::read(coordinator.cache().path_of(&BlobKey::for_path("a.mp3"))).unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_after_ready_fails_reads_and_discards_partial() {
        let dir = tempfile::tempdir().unwrap();
        let service = MockBlobService::with_tracks([("a.mp3", track(1_000))]).with_chunk_size(100).with_failure_after(5);
        let (coordinator, _service) = coordinator(&dir, service);

        let reader = coordinator.ensure_local("a.mp3").await.unwrap();
        let err = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap_err()
        })
        .await
        .unwrap();
        assert!(err.to_string().contains("stream reset by peer"));

        // The partial is removed before the failure is published.
        assert!(!coordinator.cache().contains(&BlobKey::for_path("a.mp3")).await.unwrap());
        assert_eq!(std::fs::read_dir(coordinator.cache().root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_track_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, service) = coordinator(&dir, MockBlobService::with_tracks([("a.mp3", track(10))]));
        let err = coordinator.ensure_local("missing.mp3").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Transport(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_short_track_is_ready_when_stream_ends() {
        let dir = tempfile::tempdir().unwrap();
        let service = MockBlobService::with_tracks([("tiny.wav", track(150))]).with_chunk_size(100);
        let (coordinator, _service) = coordinator(&dir, service);
        let mut reader = coordinator.ensure_local("tiny.wav").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, track(150));
    }
}
