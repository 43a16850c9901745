//! Where decoded PCM goes.

use crate::decoder::PcmSpec;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A place tracks can be played to, such as the default sound device.
///
/// Shared by every playback session; [`open`](Self::open) is called on the
/// session's own thread, so the returned sink need not be `Send`.
pub trait AudioOutput: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    fn open(&self, spec: PcmSpec) -> Result<Box<dyn OutputSink>>;
}

/// One open stream on an [`AudioOutput`].
pub trait OutputSink {
    /// Queue as many of `samples` as currently fit, waiting briefly for room.
    ///
    /// Returns how many were accepted, which may be zero.
    fn write(&mut self, samples: &[i16]) -> Result<usize>;

    /// Hold (or continue) output without dropping queued samples.
    fn set_paused(&mut self, paused: bool);

    /// Drop anything queued but not yet played.
    fn clear(&mut self);

    /// `true` once every queued sample has been played.
    fn is_drained(&self) -> bool;
}

#[derive(Debug, Default)]
struct Recorded {
    samples: Vec<i16>,
    specs: Vec<PcmSpec>,
}

/// Output that records everything written to it.
///
/// Accepts samples in blocks of at most `block` samples, sleeping for
/// `pace` before each block to imitate a device consuming in real time.
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    recorded: Arc<Mutex<Recorded>>,
    block: usize,
    pace: Duration,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            recorded: Arc::default(),
            block: usize::MAX,
            pace: Duration::ZERO,
        }
    }

    /// Accept `block` samples every `pace`.
    pub fn paced(block: usize, pace: Duration) -> Self {
        Self { block: block.max(1), pace, ..Self::new() }
    }

    /// Every sample played so far, across sessions.
    pub fn samples(&self) -> Vec<i16> {
        self.recorded.lock().samples.clone()
    }

    /// Spec of every session opened so far.
    pub fn sessions(&self) -> Vec<PcmSpec> {
        self.recorded.lock().specs.clone()
    }

    pub fn clear(&self) {
        self.recorded.lock().samples.clear();
    }
}

impl AudioOutput for MemoryOutput {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, spec: PcmSpec) -> Result<Box<dyn OutputSink>> {
        self.recorded.lock().specs.push(spec);
        Ok(Box::new(MemorySink { output: self.clone(), paused: false }))
    }
}

struct MemorySink {
    output: MemoryOutput,
    paused: bool,
}

impl OutputSink for MemorySink {
    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if self.paused || samples.is_empty() {
            return Ok(0);
        }
        if !self.output.pace.is_zero() {
            std::thread::sleep(self.output.pace);
        }
        let n = samples.len().min(self.output.block);
        self.output.recorded.lock().samples.extend_from_slice(&samples[..n]);
        Ok(n)
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn clear(&mut self) {}

    fn is_drained(&self) -> bool {
        true
    }
}
