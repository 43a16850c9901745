//! Output to a system sound device.

use crate::decoder::PcmSpec;
use crate::error::{ErrorKind, Result};
use crate::output::{AudioOutput, OutputSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long a write waits for the device to make room.
const WRITE_WAIT: Duration = Duration::from_millis(20);

/// Plays to the default output device, or a named one.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device: Option<String>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(name: impl Into<String>) -> Self {
        Self { device: Some(name.into()) }
    }

    /// Names of the output devices on the default host.
    pub fn devices() -> Vec<String> {
        match cpal::default_host().output_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not enumerate output devices");
                Vec::new()
            },
        }
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let device = match &self.device {
            Some(name) => host
                .output_devices()
                .map_err(|e| ErrorKind::Output(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| &n == name)),
            None => host.default_output_device(),
        };
        match device {
            Some(device) => Ok(device),
            None => exn::bail!(ErrorKind::Output(match &self.device {
                Some(name) => format!("no output device named {name:?}"),
                None => "no default output device".to_string(),
            })),
        }
    }
}

/// Samples waiting for the device callback.
struct Queue {
    samples: Mutex<VecDeque<i16>>,
    room: Condvar,
    paused: AtomicBool,
}

impl AudioOutput for CpalOutput {
    fn name(&self) -> &str {
        self.device.as_deref().unwrap_or("default")
    }

    fn open(&self, spec: PcmSpec) -> Result<Box<dyn OutputSink>> {
        let device = self.device()?;
        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let queue = Arc::new(Queue {
            samples: Mutex::new(VecDeque::new()),
            room: Condvar::new(),
            paused: AtomicBool::new(false),
        });
        let callback = Arc::clone(&queue);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let paused = callback.paused.load(Ordering::Acquire);
                    let mut samples = callback.samples.lock();
                    for out in data.iter_mut() {
                        *out = match paused {
                            true => 0.0,
                            false => samples.pop_front().map_or(0.0, |s| f32::from(s) / 32_768.0),
                        };
                    }
                    drop(samples);
                    callback.room.notify_one();
                },
                |err| tracing::error!(error = %err, "Audio stream error"),
                None,
            )
            .map_err(|e| ErrorKind::Output(e.to_string()))?;
        stream.play().map_err(|e| ErrorKind::Output(e.to_string()))?;
        tracing::debug!(device = self.name(), sample_rate = spec.sample_rate, channels = spec.channels, "Opened audio stream");

        // Half a second of audio.
        let capacity = (spec.sample_rate as usize * usize::from(spec.channels)) / 2;
        Ok(Box::new(CpalSink { _stream: stream, queue, capacity: capacity.max(1) }))
    }
}

struct CpalSink {
    /// Output stops when this is dropped.
    _stream: cpal::Stream,
    queue: Arc<Queue>,
    capacity: usize,
}

impl OutputSink for CpalSink {
    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let mut queued = self.queue.samples.lock();
        if queued.len() >= self.capacity {
            self.queue.room.wait_for(&mut queued, WRITE_WAIT);
        }
        let n = samples.len().min(self.capacity.saturating_sub(queued.len()));
        queued.extend(&samples[..n]);
        Ok(n)
    }

    fn set_paused(&mut self, paused: bool) {
        self.queue.paused.store(paused, Ordering::Release);
    }

    fn clear(&mut self) {
        self.queue.samples.lock().clear();
    }

    fn is_drained(&self) -> bool {
        self.queue.samples.lock().is_empty()
    }
}
