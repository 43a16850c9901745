//! Writer-to-reader handshake for an in-flight download.

use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Downloading,
    /// Promoted to the complete blob at this path.
    Finished(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    /// Every byte below this offset is durably in the working file.
    pub high_water: u64,
    pub chunks: u32,
    /// Length of non-audio data at the end of the finished blob.
    pub trailing: u64,
    pub phase: Phase,
}

/// Monotonic high-water mark shared by the download task (sole writer) and
/// the streaming reader (sole consumer).
///
/// The writer only raises the mark after the bytes below it have been
/// written and synced, and readers only trust bytes below the mark they
/// observed under the same lock, which orders every read after the write it
/// depends on.
#[derive(Debug)]
pub(crate) struct Progress {
    state: Mutex<Snapshot>,
    changed: Condvar,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Snapshot { high_water: 0, chunks: 0, trailing: 0, phase: Phase::Downloading }),
            changed: Condvar::new(),
        }
    }

    /// Publish a new high-water mark; returns the number of chunks landed.
    pub fn advance(&self, high_water: u64) -> u32 {
        let mut state = self.state.lock();
        debug_assert!(high_water >= state.high_water, "high-water mark must not move backwards");
        state.high_water = state.high_water.max(high_water);
        state.chunks += 1;
        let chunks = state.chunks;
        drop(state);
        self.changed.notify_all();
        chunks
    }

    pub fn finish(&self, path: PathBuf, trailing: u64) {
        let mut state = self.state.lock();
        state.trailing = trailing.min(state.high_water);
        state.phase = Phase::Finished(path);
        drop(state);
        self.changed.notify_all();
    }

    pub fn fail(&self, reason: String) {
        self.state.lock().phase = Phase::Failed(reason);
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().clone()
    }

    /// Block until a byte at `offset` is available or the download is over.
    pub fn wait_past(&self, offset: u64) -> Snapshot {
        let mut state = self.state.lock();
        while state.high_water <= offset && state.phase == Phase::Downloading {
            self.changed.wait(&mut state);
        }
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_advance_counts_chunks() {
        let progress = Progress::new();
        assert_eq!(progress.advance(10), 1);
        assert_eq!(progress.advance(25), 2);
        let snap = progress.snapshot();
        assert_eq!((snap.high_water, snap.chunks), (25, 2));
        assert_eq!(snap.phase, Phase::Downloading);
    }

    #[test]
    fn test_wait_past_returns_immediately_when_available() {
        let progress = Progress::new();
        progress.advance(10);
        assert_eq!(progress.wait_past(9).high_water, 10);
    }

    #[test]
    fn test_wait_past_wakes_on_advance_and_finish() {
        let progress = Arc::new(Progress::new());
        let waiter = {
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || progress.wait_past(0))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        progress.advance(4);
        assert_eq!(waiter.join().unwrap().high_water, 4);

        let waiter = {
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || progress.wait_past(4))
        };
        progress.finish(PathBuf::from("/blobs/abc"), 0);
        assert_eq!(waiter.join().unwrap().phase, Phase::Finished(PathBuf::from("/blobs/abc")));
    }

    #[test]
    fn test_trailing_never_exceeds_high_water() {
        let progress = Progress::new();
        progress.advance(100);
        progress.finish(PathBuf::from("x"), 500);
        assert_eq!(progress.snapshot().trailing, 100);
    }
}
