//! Playback of catalog tracks while they download.
//!
//! The [`PlaybackEngine`] resolves a track through the download coordinator,
//! decodes it with symphonia on a dedicated thread, and plays the PCM to an
//! [`AudioOutput`]: the system's sound device ([`CpalOutput`], behind the
//! `cpal` feature) or a [`MemoryOutput`] that records what it is given.

mod decoder;
#[cfg(feature = "cpal")]
mod device;
mod engine;
pub mod error;
mod format;
mod output;
mod playlist;
mod reporter;
mod sink;

pub use crate::decoder::{PcmDecoder, PcmSpec};
#[cfg(feature = "cpal")]
pub use crate::device::CpalOutput;
pub use crate::engine::{Meta, PlaybackEngine};
pub use crate::format::{Format, PCM_FRAME_SIZE, frame_aligned_offset};
pub use crate::output::{AudioOutput, MemoryOutput, OutputSink};
pub use crate::playlist::Playlist;
pub use crate::reporter::{Control, Progress, Report, TICK_INTERVAL};
