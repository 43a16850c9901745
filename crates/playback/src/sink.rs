//! Per-session worker thread that decodes and feeds the audio output.

use crate::decoder::{CodedRate, PcmDecoder, PcmSpec};
use crate::error::{ErrorKind, Result};
use crate::output::{AudioOutput, OutputSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Most samples handed to the output per write.
const BLOCK: usize = 4_096;
/// Poll interval while waiting for the output to play out its queue.
const DRAIN_POLL: Duration = Duration::from_millis(10);

enum Command {
    Pause,
    Resume,
    Seek { offset: u64, reply: oneshot::Sender<Result<u64>> },
    Stop,
}

#[derive(Debug)]
struct State {
    playing: AtomicBool,
    finished: AtomicBool,
    failed: AtomicBool,
    volume: AtomicU32,
    /// Position in the decoded stream, in PCM bytes.
    position: AtomicU64,
    coded_bytes: AtomicU64,
    coded_frames: AtomicU64,
}

/// Cloneable handle for steering a running [`Sink`].
#[derive(Debug, Clone)]
pub(crate) struct SinkControl {
    commands: Sender<Command>,
    state: Arc<State>,
    spec: PcmSpec,
}

impl SinkControl {
    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn pause(&self) {
        self.state.playing.store(false, Ordering::Release);
        _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        if !self.is_finished() {
            self.state.playing.store(true, Ordering::Release);
        }
        _ = self.commands.send(Command::Resume);
    }

    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    /// `true` once the track has played out (or broke off).
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.volume.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.state.volume.load(Ordering::Acquire))
    }

    /// PCM bytes into the track that have been handed to the output.
    pub fn position(&self) -> u64 {
        self.state.position.load(Ordering::Acquire)
    }

    /// Compressed bytes and decoded frames the decoder has seen.
    pub fn coded(&self) -> CodedRate {
        CodedRate {
            bytes: self.state.coded_bytes.load(Ordering::Acquire),
            frames: self.state.coded_frames.load(Ordering::Acquire),
        }
    }

    /// Reposition the decoder to a PCM byte offset.
    pub async fn seek(&self, offset: u64) -> Result<u64> {
        let (reply, landed) = oneshot::channel();
        if self.commands.send(Command::Seek { offset, reply }).is_err() {
            exn::bail!(ErrorKind::Seek("playback session has ended".to_string()));
        }
        match landed.await {
            Ok(result) => result,
            Err(_) => exn::bail!(ErrorKind::Seek("playback session ended during seek".to_string())),
        }
    }
}

/// A playback session: decoder and output driven by a dedicated thread.
///
/// Dropping the sink stops the thread. It is not joined: it may be blocked
/// on a read from a download that has stalled, and exits once that returns.
#[derive(Debug)]
pub(crate) struct Sink {
    control: SinkControl,
    _thread: JoinHandle<()>,
}

impl Sink {
    /// Start `decoder` on `output` from PCM offset `position`, playing or
    /// paused.
    ///
    /// Blocks until the output has been opened on the new thread.
    pub fn start(
        decoder: PcmDecoder,
        output: Arc<dyn AudioOutput>,
        volume: f32,
        position: u64,
        playing: bool,
    ) -> Result<Self> {
        let spec = decoder.spec();
        let coded = decoder.coded();
        let state = Arc::new(State {
            playing: AtomicBool::new(playing),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            position: AtomicU64::new(position),
            coded_bytes: AtomicU64::new(coded.bytes),
            coded_frames: AtomicU64::new(coded.frames),
        });
        let (commands, receiver) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        let worker_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("encore-sink".to_string())
            .spawn(move || {
                let output_sink = match output.open(spec) {
                    Ok(sink) => sink,
                    Err(err) => {
                        _ = opened_tx.send(Err(err));
                        return;
                    },
                };
                _ = opened_tx.send(Ok(()));
                Worker { decoder, output: output_sink, commands: receiver, state: worker_state }.run();
            })
            .map_err(|e| ErrorKind::Output(e.to_string()))?;

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self { control: SinkControl { commands, state, spec }, _thread: thread }),
            Ok(Err(err)) => Err(err),
            Err(_) => exn::bail!(ErrorKind::Output("audio thread exited during start-up".to_string())),
        }
    }

    pub fn control(&self) -> &SinkControl {
        &self.control
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.control.state.playing.store(false, Ordering::Release);
        _ = self.control.commands.send(Command::Stop);
    }
}

struct Worker {
    decoder: PcmDecoder,
    output: Box<dyn OutputSink>,
    commands: Receiver<Command>,
    state: Arc<State>,
}

impl Worker {
    fn run(mut self) {
        let mut pending: Vec<i16> = Vec::new();
        let mut exhausted = false;
        let mut paused = !self.state.playing.load(Ordering::Acquire);
        if paused {
            self.output.set_paused(true);
        }
        loop {
            let idle = paused || self.state.finished.load(Ordering::Acquire);
            let command = if idle {
                self.commands.recv().unwrap_or(Command::Stop)
            } else {
                match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Disconnected) => Command::Stop,
                    Err(TryRecvError::Empty) => {
                        self.step(&mut pending, &mut exhausted);
                        continue;
                    },
                }
            };
            match command {
                Command::Pause => {
                    paused = true;
                    self.output.set_paused(true);
                },
                Command::Resume => {
                    paused = false;
                    self.output.set_paused(false);
                },
                Command::Seek { offset, reply } => {
                    self.output.clear();
                    pending.clear();
                    let result = self.decoder.seek(offset);
                    if let Ok(position) = &result {
                        self.state.position.store(*position, Ordering::Release);
                        self.state.finished.store(false, Ordering::Release);
                        self.state.failed.store(false, Ordering::Release);
                        self.state.playing.store(!paused, Ordering::Release);
                        exhausted = false;
                    }
                    _ = reply.send(result);
                },
                Command::Stop => break,
            }
        }
        self.output.clear();
        tracing::debug!("Playback session closed");
    }

    /// Decode or play one block.
    fn step(&mut self, pending: &mut Vec<i16>, exhausted: &mut bool) {
        if pending.is_empty() {
            if *exhausted {
                match self.output.is_drained() {
                    true => self.finish(),
                    false => std::thread::sleep(DRAIN_POLL),
                }
                return;
            }
            match self.decoder.next_samples() {
                Ok(Some(samples)) => {
                    let coded = self.decoder.coded();
                    self.state.coded_bytes.store(coded.bytes, Ordering::Release);
                    self.state.coded_frames.store(coded.frames, Ordering::Release);
                    *pending = samples;
                },
                Ok(None) => *exhausted = true,
                Err(err) => {
                    tracing::error!(error = ?err, "Playback stopped by decoder");
                    self.state.failed.store(true, Ordering::Release);
                    *exhausted = true;
                },
            }
            return;
        }

        let volume = f32::from_bits(self.state.volume.load(Ordering::Acquire));
        let block = &pending[..pending.len().min(BLOCK)];
        let scaled: Vec<i16> = match volume >= 1.0 {
            true => block.to_vec(),
            false => block.iter().map(|s| (f32::from(*s) * volume) as i16).collect(),
        };
        match self.output.write(&scaled) {
            Ok(n) => {
                pending.drain(..n);
                self.state.position.fetch_add(2 * n as u64, Ordering::AcqRel);
            },
            Err(err) => {
                tracing::error!(error = ?err, "Audio output failed");
                self.state.failed.store(true, Ordering::Release);
                pending.clear();
                *exhausted = true;
            },
        }
    }

    fn finish(&mut self) {
        self.state.playing.store(false, Ordering::Release);
        self.state.finished.store(true, Ordering::Release);
        tracing::debug!(failed = self.state.failed.load(Ordering::Acquire), "Track played out");
    }
}
