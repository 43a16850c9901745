//! In-process blob service for testing.

use crate::error::{ErrorKind, Result};
use crate::service::{BlobService, ChunkStream};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Releases chunks of a gated [`MockBlobService`] one at a time.
#[derive(Debug, Clone)]
pub struct ChunkGate(Arc<Semaphore>);

impl ChunkGate {
    /// Let `chunks` more chunks through.
    pub fn release(&self, chunks: usize) {
        self.0.add_permits(chunks);
    }
}

/// Serves in-memory tracks in fixed-size chunks.
///
/// Counts download calls and chunks sent so tests can assert on network
/// traffic, and can optionally hold every chunk behind a [`ChunkGate`] or
/// break the stream after a number of chunks.
#[derive(Debug)]
pub struct MockBlobService {
    tracks: HashMap<String, Vec<u8>>,
    chunk_size: usize,
    fail_after: Option<usize>,
    gate: Option<ChunkGate>,
    calls: AtomicUsize,
    sent: Arc<AtomicUsize>,
}

impl MockBlobService {
    pub fn with_tracks(tracks: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        Self {
            tracks: tracks.into_iter().map(|(path, data)| (path.into(), data.into())).collect(),
            chunk_size: 1024,
            fail_after: None,
            gate: None,
            calls: AtomicUsize::new(0),
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Break every download with a transport error after `chunks` chunks.
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Hold every chunk until the returned gate releases it.
    pub fn gated(mut self) -> (Self, ChunkGate) {
        let gate = ChunkGate(Arc::new(Semaphore::new(0)));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Number of download calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of chunks handed to callers so far.
    pub fn chunks_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`chunks_sent`](Self::chunks_sent).
    pub fn sent_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl BlobService for MockBlobService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(&self, path: &str) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(data) = self.tracks.get(path).cloned() else {
            exn::bail!(ErrorKind::Transport(format!("no such track: {path}")));
        };
        let chunk_size = self.chunk_size;
        let fail_after = self.fail_after;
        let gate = self.gate.clone();
        let sent = Arc::clone(&self.sent);
        Ok(Box::pin(stream! {
            for (n, chunk) in data.chunks(chunk_size).enumerate() {
                if let Some(ChunkGate(semaphore)) = &gate {
                    match semaphore.acquire().await {
                        Ok(permit) => permit.forget(),
                        Err(_) => return,
                    }
                }
                if fail_after == Some(n) {
                    yield Err(exn::Exn::from(ErrorKind::Transport("stream reset by peer".to_string())));
                    return;
                }
                sent.fetch_add(1, Ordering::SeqCst);
                yield Ok(chunk.to_vec());
            }
        }))
    }
}
