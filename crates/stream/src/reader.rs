//! Seekable byte source over a cached or still-downloading track.

use crate::progress::{Phase, Progress};
use crate::trailer::trailing_len;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

enum Mode {
    /// Whole track in memory (it was already cached).
    Static(Vec<u8>),
    /// Reading the working file while the download task appends to it.
    Downloading {
        file: File,
        progress: Arc<Progress>,
        /// Removed from disk once the download and every reader are done with it.
        _working: Arc<NamedTempFile>,
    },
    /// Reading the complete blob the download was promoted to.
    Finished { file: File, len: u64 },
}

enum Source {
    Static { len: u64, trailing: u64 },
    Download(Arc<Progress>),
}

struct Shared {
    position: AtomicU64,
    source: Source,
}

/// Cloneable, thread-safe view of a reader's size and position.
///
/// Lets the playback engine report progress while the reader itself is
/// owned by the decoder.
#[derive(Clone)]
pub struct ReaderStats {
    shared: Arc<Shared>,
}

impl ReaderStats {
    /// Bytes available so far, minus trailing non-audio data.
    ///
    /// While downloading, the trailing region is not yet known and counts
    /// as audio.
    pub fn size(&self) -> u64 {
        match &self.shared.source {
            Source::Static { len, trailing } => len - trailing,
            Source::Download(progress) => {
                let snap = progress.snapshot();
                snap.high_water - snap.trailing
            },
        }
    }

    /// Bytes between the read cursor and [`size`](Self::size).
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.position())
    }

    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// `true` while bytes are still arriving.
    pub fn is_downloading(&self) -> bool {
        match &self.shared.source {
            Source::Static { .. } => false,
            Source::Download(progress) => progress.snapshot().phase == Phase::Downloading,
        }
    }

    /// `true` if the download behind this reader broke off.
    pub fn has_failed(&self) -> bool {
        match &self.shared.source {
            Source::Static { .. } => false,
            Source::Download(progress) => matches!(progress.snapshot().phase, Phase::Failed(_)),
        }
    }
}

/// Randomly seekable byte source for one track.
///
/// Starts out either **static** (the track was already cached and is
/// served from memory) or **downloading** (served from a working file that
/// a background task is appending to). A downloading reader switches itself
/// to **finished**, backed by the complete cache blob, the first time it
/// notices the download has completed.
///
/// While downloading, [`read`](Read::read) never returns a byte the
/// download task has not yet durably written: a read at or past the
/// high-water mark **blocks** until more bytes land, the download completes
/// (end of file is then reported normally), or the download fails (an I/O
/// error is returned). [`seek`](Seek::seek) may move past the high-water
/// mark; `SeekFrom::End` is relative to the bytes available so far.
pub struct StreamingReader {
    mode: Mode,
    position: u64,
    shared: Arc<Shared>,
}

impl StreamingReader {
    /// Serve a fully available track from memory.
    pub fn from_static(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        let trailing = trailing_len(&mut Cursor::new(&data)).unwrap_or(0).min(len);
        let shared = Arc::new(Shared {
            position: AtomicU64::new(0),
            source: Source::Static { len, trailing },
        });
        Self { mode: Mode::Static(data), position: 0, shared }
    }

    pub(crate) fn downloading(working: Arc<NamedTempFile>, progress: Arc<Progress>) -> io::Result<Self> {
        let file = working.reopen()?;
        let shared = Arc::new(Shared {
            position: AtomicU64::new(0),
            source: Source::Download(Arc::clone(&progress)),
        });
        Ok(Self {
            mode: Mode::Downloading { file, progress, _working: working },
            position: 0,
            shared,
        })
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats { shared: Arc::clone(&self.shared) }
    }

    pub fn size(&self) -> u64 {
        self.stats().size()
    }

    pub fn remaining(&self) -> u64 {
        self.stats().remaining()
    }

    /// Name of the current state, for logging.
    pub fn state(&self) -> &'static str {
        match self.mode {
            Mode::Static(_) => "static",
            Mode::Downloading { .. } => "downloading",
            Mode::Finished { .. } => "finished",
        }
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
        self.shared.position.store(position, Ordering::Release);
    }

    /// Switch to the complete blob, keeping the read cursor where it is.
    fn promote(&mut self, path: &std::path::Path) -> io::Result<()> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(self.position))?;
        tracing::debug!(path = %path.display(), position = self.position, "Streaming reader switched to finished blob");
        self.mode = Mode::Finished { file, len };
        Ok(())
    }

    /// Total length if it is known yet.
    fn known_len(&self) -> Option<u64> {
        match &self.mode {
            Mode::Static(data) => Some(data.len() as u64),
            Mode::Finished { len, .. } => Some(*len),
            Mode::Downloading { progress, .. } => {
                let snap = progress.snapshot();
                matches!(snap.phase, Phase::Finished(_)).then_some(snap.high_water)
            },
        }
    }
}

impl Read for StreamingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match &mut self.mode {
                Mode::Static(data) => {
                    let start = usize::try_from(self.position).unwrap_or(usize::MAX).min(data.len());
                    let n = buf.len().min(data.len() - start);
                    buf[..n].copy_from_slice(&data[start..start + n]);
                    self.set_position(self.position + n as u64);
                    return Ok(n);
                },
                Mode::Finished { file, .. } => {
                    let n = file.read(buf)?;
                    self.set_position(self.position + n as u64);
                    return Ok(n);
                },
                Mode::Downloading { file, progress, .. } => {
                    let snap = progress.wait_past(self.position);
                    match snap.phase {
                        Phase::Finished(path) => self.promote(&path)?,
                        Phase::Failed(reason) => return Err(io::Error::other(reason)),
                        Phase::Downloading => {
                            let available = snap.high_water - self.position;
                            let limit = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
                            let n = file.read(&mut buf[..limit])?;
                            if n == 0 {
                                return Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "working file is shorter than its high-water mark",
                                ));
                            }
                            self.set_position(self.position + n as u64);
                            return Ok(n);
                        },
                    }
                },
            }
        }
    }
}

impl Seek for StreamingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let end = match self.known_len() {
                    Some(len) => len,
                    None => match &self.mode {
                        Mode::Downloading { progress, .. } => progress.snapshot().high_water,
                        _ => 0,
                    },
                };
                end.checked_add_signed(delta)
            },
        };
        let Some(target) = target else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position"));
        };
        match &mut self.mode {
            Mode::Static(_) => {},
            Mode::Finished { file, .. } | Mode::Downloading { file, .. } => {
                file.seek(SeekFrom::Start(target))?;
            },
        }
        self.set_position(target);
        Ok(target)
    }
}

impl symphonia::core::io::MediaSource for StreamingReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.known_len()
    }
}
