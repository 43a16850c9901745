//! Periodic playback position reports.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default time between reports.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Steering for a running reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Stop the clock (playback paused).
    Stop,
    /// Restart the clock where it stopped.
    Resume,
    /// Restart the clock from zero.
    Reset,
    /// Set the clock (playback was repositioned).
    Reposition(Duration),
    /// Exit.
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub elapsed: Duration,
    /// How far through the track the reader is, `0.0..=100.0`.
    pub percent: f64,
    /// The track is still downloading.
    pub loading: bool,
}

/// Latest news from the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Idle,
    Playing { path: String, progress: Progress },
    Ended { path: String, failed: bool },
}

/// What the reporter samples on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Sample {
    pub percent: f64,
    pub loading: bool,
    pub finished: bool,
    pub failed: bool,
}

pub(crate) type Probe = Box<dyn Fn() -> Sample + Send + Sync>;

/// Handle to a reporter task.
#[derive(Debug)]
pub(crate) struct Reporter {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl Reporter {
    /// Publish reports for `path` to `updates` every `interval`, with the
    /// clock starting at `elapsed`.
    ///
    /// A finished track is reported as [`Report::Ended`] once; reports pick
    /// up again if it is repositioned and plays on.
    pub fn spawn(
        path: String,
        probe: Probe,
        updates: Arc<watch::Sender<Report>>,
        interval: Duration,
        elapsed: Duration,
    ) -> Self {
        let (control, commands) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(path, probe, updates, commands, interval, elapsed));
        Self { control, task }
    }

    pub fn send(&self, control: Control) {
        _ = self.control.send(control);
    }

    /// Steer the reporter without owning it.
    pub fn controls(&self) -> mpsc::UnboundedSender<Control> {
        self.control.clone()
    }

    /// Stop the reporter and wait for it to exit.
    pub async fn kill(self) {
        self.send(Control::Kill);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reporter task did not exit cleanly");
        }
    }
}

#[tracing::instrument(name = "reporter", skip_all, fields(path = %path))]
async fn run(
    path: String,
    probe: Probe,
    updates: Arc<watch::Sender<Report>>,
    mut commands: mpsc::UnboundedReceiver<Control>,
    interval: Duration,
    mut elapsed: Duration,
) {
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut running = true;
    let mut ended = false;

    let publish = |elapsed: Duration, sample: Sample| {
        updates.send_replace(Report::Playing {
            path: path.clone(),
            progress: Progress { elapsed, percent: sample.percent, loading: sample.loading },
        });
    };
    publish(elapsed, probe());

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(Control::Kill) => break,
                Some(Control::Stop) => running = false,
                Some(Control::Resume) => running = true,
                Some(Control::Reset) => {
                    elapsed = Duration::ZERO;
                    running = true;
                },
                Some(Control::Reposition(at)) => {
                    elapsed = at;
                    let sample = probe();
                    if !sample.finished {
                        ended = false;
                        publish(elapsed, sample);
                    }
                },
            },
            _ = ticker.tick() => {
                if running {
                    elapsed += interval;
                }
                let sample = probe();
                match (sample.finished, ended) {
                    (true, true) => {},
                    (true, false) => {
                        tracing::debug!(failed = sample.failed, "Track ended");
                        updates.send_replace(Report::Ended { path: path.clone(), failed: sample.failed });
                        ended = true;
                    },
                    (false, _) => {
                        ended = false;
                        publish(elapsed, sample);
                    },
                }
            },
        }
    }
}
