use crate::decoder::PcmDecoder;
use crate::error::{ErrorKind, Result};
use crate::format::{Format, frame_aligned_offset};
use crate::output::AudioOutput;
use crate::reporter::{Control, Probe, Report, Reporter, Sample, TICK_INTERVAL};
use crate::sink::{Sink, SinkControl};
use encore_stream::{DownloadCoordinator, ReaderStats};
use exn::ResultExt;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::instrument;

/// Snapshot of the loaded track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub path: String,
    pub format: Format,
    /// Track size in bytes, excluding trailing non-audio data once known.
    pub size: u64,
    /// Bytes of [`size`](Self::size) not yet read by the decoder.
    pub remaining: u64,
    /// The track is still being downloaded.
    pub downloading: bool,
    pub playing: bool,
}

/// Owned resources of the playing track.
struct Session {
    sink: Sink,
    reporter: Reporter,
}

/// Cheap handles onto the playing track, readable without the session lock.
#[derive(Clone)]
struct Current {
    path: String,
    format: Format,
    stats: ReaderStats,
    control: SinkControl,
    clock: mpsc::UnboundedSender<Control>,
    pcm_len: Option<u64>,
}

/// Plays one track at a time from the catalog.
///
/// Tracks are fetched through the [`DownloadCoordinator`] (so playback can
/// start while the rest of the file is still arriving), decoded on a
/// dedicated thread, and played to an [`AudioOutput`]. Position reports are
/// published on a [`watch`] channel; see [`subscribe`](Self::subscribe).
pub struct PlaybackEngine {
    coordinator: DownloadCoordinator,
    output: Arc<dyn AudioOutput>,
    tick: Duration,
    updates: Arc<watch::Sender<Report>>,
    session: Mutex<Option<Session>>,
    current: RwLock<Option<Current>>,
}

impl PlaybackEngine {
    pub fn new(coordinator: DownloadCoordinator, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            coordinator,
            output,
            tick: TICK_INTERVAL,
            updates: Arc::new(watch::Sender::new(Report::Idle)),
            session: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    /// Override the interval between position reports.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Position reports for whatever is playing.
    pub fn subscribe(&self) -> watch::Receiver<Report> {
        self.updates.subscribe()
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    /// Stop whatever is playing, then play `path` at `volume` starting
    /// `byte_offset` bytes into its decoded PCM (rounded down to a frame).
    ///
    /// Returns once playback has started. The engine is left stopped if the
    /// track cannot be fetched, decoded or positioned.
    pub async fn load_track(&self, path: &str, volume: f32, byte_offset: u64) -> Result<()> {
        self.load(path, volume, byte_offset, true).await
    }

    #[instrument(skip(self), fields(output = self.output.name()))]
    async fn load(&self, path: &str, volume: f32, byte_offset: u64, playing: bool) -> Result<()> {
        let mut session = self.session.lock().await;
        self.close(&mut session).await;

        let Some(format) = Format::from_path(path) else {
            let extension = Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or_default();
            tracing::warn!(extension, "No decoder for track");
            exn::bail!(ErrorKind::UnsupportedFormat(extension.to_string()));
        };
        let reader = self.coordinator.ensure_local(path).await.or_raise(|| ErrorKind::Fetch)?;
        let stats = reader.stats();

        let output = Arc::clone(&self.output);
        let started = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut decoder = PcmDecoder::open(reader, format)?;
            let frame = decoder.spec().frame_size();
            let position = match byte_offset - byte_offset % frame {
                0 => 0,
                offset => decoder.seek(offset)?,
            };
            let pcm_len = decoder.pcm_len();
            let sink = Sink::start(decoder, output, volume, position, playing)?;
            Ok((sink, position, pcm_len))
        })
        .await
        .map_err(|e| ErrorKind::Decode(format!("decoder task failed: {e}")))?;
        let (sink, position, pcm_len) = match started {
            Ok(started) => started,
            Err(err) => {
                tracing::error!(error = ?err, "Could not start playback");
                return Err(err);
            },
        };

        let control = sink.control().clone();
        let reporter = Reporter::spawn(
            path.to_string(),
            probe(stats.clone(), control.clone()),
            Arc::clone(&self.updates),
            self.tick,
            control.spec().duration_of(position),
        );
        if !playing {
            reporter.send(Control::Stop);
        }
        *self.current.write() = Some(Current {
            path: path.to_string(),
            format,
            stats,
            clock: reporter.controls(),
            control,
            pcm_len,
        });
        *session = Some(Session { sink, reporter });
        tracing::info!(%format, position, playing, "Playback started");
        Ok(())
    }

    /// Snapshot of the loaded track, if any.
    pub fn meta(&self) -> Option<Meta> {
        let current = self.current.read();
        let current = current.as_ref()?;
        Some(Meta {
            path: current.path.clone(),
            format: current.format,
            size: current.stats.size(),
            remaining: current.stats.remaining(),
            downloading: current.stats.is_downloading(),
            playing: current.control.is_playing(),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.current.read().as_ref().is_some_and(|c| c.control.is_playing())
    }

    /// Pause playback; does nothing if no track is loaded.
    pub fn pause(&self) {
        if let Some(current) = self.current.read().as_ref() {
            current.control.pause();
            _ = current.clock.send(Control::Stop);
        }
    }

    /// Resume paused playback; does nothing if no track is loaded.
    pub fn resume(&self) {
        if let Some(current) = self.current.read().as_ref() {
            current.control.resume();
            _ = current.clock.send(Control::Resume);
        }
    }

    /// Volume of the loaded track, `0.0..=1.0`.
    pub fn volume(&self) -> Option<f32> {
        self.current.read().as_ref().map(|c| c.control.volume())
    }

    /// Set the volume (clamped to `0.0..=1.0`) of the loaded track.
    pub fn set_volume(&self, volume: f32) {
        if let Some(current) = self.current.read().as_ref() {
            current.control.set_volume(volume);
        }
    }

    /// Stop playback and release the track.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.close(&mut session).await;
        self.updates.send_replace(Report::Idle);
    }

    /// Jump to `percent` (clamped to `0..=100`) of the way through the track.
    ///
    /// While the track is still downloading it is reloaded at the new
    /// position, keeping it paused if it was; otherwise the running decoder
    /// is repositioned. Returns the frame-aligned PCM offset playback
    /// continues from. On error the position is undefined and the caller
    /// should stop playback.
    ///
    /// Containers that do not declare their decoded length are measured
    /// against the compression rate of the packets decoded so far, so a
    /// seek straight after loading such a track can fail with
    /// [`ErrorKind::Seek`].
    #[instrument(skip(self))]
    pub async fn seek_percent(&self, percent: f64) -> Result<u64> {
        let Some(current) = self.current.read().clone() else {
            exn::bail!(ErrorKind::NothingLoaded);
        };
        let spec = current.control.spec();
        let size = match current.pcm_len {
            Some(len) => len,
            None => match current.control.coded().pcm_len(current.stats.size(), spec.frame_size()) {
                Some(len) => len,
                None => exn::bail!(ErrorKind::Seek("track length not known yet".to_string())),
            },
        };
        let offset = frame_aligned_offset(size, percent, spec.frame_size());

        if current.stats.is_downloading() {
            let playing = current.control.is_playing();
            tracing::debug!(offset, playing, "Track still downloading; reloading at new position");
            self.load(&current.path, current.control.volume(), offset, playing).await?;
            return Ok(offset);
        }
        let landed = current.control.seek(offset).await?;
        _ = current.clock.send(Control::Reposition(spec.duration_of(landed)));
        Ok(landed)
    }

    /// Tear down the running session, if any.
    async fn close(&self, session: &mut Option<Session>) {
        self.current.write().take();
        if let Some(Session { sink, reporter }) = session.take() {
            reporter.kill().await;
            sink.control().pause();
            drop(sink);
            tracing::debug!("Previous track stopped");
        }
    }
}

/// What the reporter samples: reader progress and sink state.
fn probe(stats: ReaderStats, control: SinkControl) -> Probe {
    Box::new(move || {
        let size = stats.size();
        let percent = match size {
            0 => 0.0,
            size => (stats.position() as f64 / size as f64 * 100.0).min(100.0),
        };
        Sample {
            percent,
            loading: stats.is_downloading(),
            finished: control.is_finished(),
            failed: control.has_failed() || stats.has_failed(),
        }
    })
}
