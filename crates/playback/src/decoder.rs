//! Container demuxing and decoding to interleaved 16-bit PCM.

use crate::error::{ErrorKind, Result};
use crate::format::Format;
use encore_stream::StreamingReader;
use std::io;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Shape of the PCM a decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmSpec {
    /// Bytes per frame: one 16-bit sample per channel.
    pub fn frame_size(&self) -> u64 {
        2 * u64::from(self.channels.max(1))
    }

    /// Play time of `bytes` bytes of PCM.
    pub fn duration_of(&self, bytes: u64) -> Duration {
        let frames = bytes / self.frame_size();
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Pulls packets from a [`StreamingReader`] and decodes them to PCM.
///
/// All calls may block: reads on a track that is still downloading wait for
/// the bytes to arrive. Keep it off the async runtime.
pub struct PcmDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: PcmSpec,
    frames: Option<u64>,
    buffer: Option<SampleBuffer<i16>>,
    /// Frames still to drop after a seek landed on an earlier packet.
    skip: u64,
    coded: CodedRate,
}

/// Running totals of compressed input against decoded output, for
/// estimating the decoded length of a stream that does not declare it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodedRate {
    /// Packet bytes decoded so far.
    pub bytes: u64,
    /// Frames those packets decoded to.
    pub frames: u64,
}

impl CodedRate {
    /// Decoded length in bytes of a stream of `coded_len` compressed bytes,
    /// assuming the rest of it codes at the rate seen so far.
    pub fn pcm_len(&self, coded_len: u64, frame_size: u64) -> Option<u64> {
        if self.bytes == 0 {
            return None;
        }
        let frames = u128::from(coded_len) * u128::from(self.frames) / u128::from(self.bytes);
        u64::try_from(frames).ok()?.checked_mul(frame_size)
    }
}

impl PcmDecoder {
    pub fn open(source: StreamingReader, format: Format) -> Result<Self> {
        let stream = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());
        let mut hint = Hint::new();
        hint.with_extension(format.extension());
        let probed = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| ErrorKind::Decode(e.to_string()))?;
        let reader = probed.format;

        let Some(track) = reader.tracks().iter().find(|t| t.codec_params.codec != CODEC_TYPE_NULL) else {
            exn::bail!(ErrorKind::Decode(format!("no audio track in {format} container")));
        };
        let params = &track.codec_params;
        let (Some(sample_rate), Some(channels)) = (params.sample_rate, params.channels) else {
            exn::bail!(ErrorKind::Decode("stream does not declare its sample rate and channels".to_string()));
        };
        let spec = PcmSpec { sample_rate, channels: channels.count() as u16 };
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| ErrorKind::Decode(e.to_string()))?;
        tracing::debug!(%format, sample_rate, channels = spec.channels, frames = ?params.n_frames, "Opened decoder");

        Ok(Self {
            track_id: track.id,
            frames: params.n_frames,
            reader,
            decoder,
            spec,
            buffer: None,
            skip: 0,
            coded: CodedRate::default(),
        })
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// Length of the whole decoded stream in bytes, if the container says.
    pub fn pcm_len(&self) -> Option<u64> {
        self.frames.map(|frames| frames * self.spec.frame_size())
    }

    /// Compressed bytes and decoded frames seen so far.
    pub fn coded(&self) -> CodedRate {
        self.coded
    }

    /// Next run of interleaved samples, or `None` at the end of the track.
    ///
    /// Corrupt packets are skipped. A read failure (such as a download
    /// breaking off) is reported as [`ErrorKind::Fetch`].
    pub fn next_samples(&mut self) -> Result<Option<Vec<i16>>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(SymphoniaError::IoError(e)) => {
                    tracing::warn!(error = %e, "Track source failed");
                    exn::bail!(ErrorKind::Fetch);
                },
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                },
                Err(e) => exn::bail!(ErrorKind::Decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::warn!(reason, ts = packet.ts(), "Skipping undecodable packet");
                    continue;
                },
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => exn::bail!(ErrorKind::Decode(e.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }
            self.coded.bytes += packet.data.len() as u64;
            self.coded.frames += decoded.frames() as u64;
            let spec = *decoded.spec();
            let wanted = decoded.capacity() * spec.channels.count();
            if self.buffer.as_ref().is_none_or(|buffer| buffer.capacity() < wanted) {
                self.buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buffer) = self.buffer.as_mut() else {
                continue;
            };
            buffer.copy_interleaved_ref(decoded);

            let channels = spec.channels.count();
            let frames = (buffer.samples().len() / channels.max(1)) as u64;
            let skip = self.skip.min(frames);
            self.skip -= skip;
            let samples = &buffer.samples()[skip as usize * channels..];
            if samples.is_empty() {
                continue;
            }
            return Ok(Some(samples.to_vec()));
        }
    }

    /// Reposition to `byte_offset` bytes into the decoded stream, rounded
    /// down to a whole frame. Returns the offset playback resumes from.
    pub fn seek(&mut self, byte_offset: u64) -> Result<u64> {
        let mut frame = byte_offset / self.spec.frame_size();
        if let Some(total) = self.frames {
            frame = frame.min(total.saturating_sub(1));
        }
        let seeked = self
            .reader
            .seek(SeekMode::Accurate, SeekTo::TimeStamp { ts: frame, track_id: self.track_id })
            .map_err(|e| ErrorKind::Seek(e.to_string()))?;
        self.decoder.reset();
        self.skip = seeked.required_ts.saturating_sub(seeked.actual_ts);
        tracing::debug!(byte_offset, frame, actual = seeked.actual_ts, "Decoder repositioned");
        Ok(seeked.required_ts * self.spec.frame_size())
    }
}
