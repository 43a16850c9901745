use derive_more::Display;
use std::path::Path;

/// Bytes per PCM frame of the reference output: 16-bit samples, two channels.
pub const PCM_FRAME_SIZE: u64 = 4;

/// Containers the engine can decode, chosen by file extension.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    #[display("mp3")]
    Mp3,
    #[display("wav")]
    Wav,
}

impl Format {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(Self::Mp3),
            "wav" | "wave" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Extension hint for the container probe.
    pub(crate) fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// Byte offset `percent`% of the way through `size` bytes, rounded down to
/// a whole number of `frame`-byte PCM frames.
///
/// `percent` is clamped to `0..=100`.
pub fn frame_aligned_offset(size: u64, percent: f64, frame: u64) -> u64 {
    let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    let offset = ((size as f64) * percent / 100.0) as u64;
    let offset = offset.min(size);
    match frame {
        0 => offset,
        frame => offset - offset % frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.mp3", Some(Format::Mp3))]
    #[case("Artist/Album/01 Track.MP3", Some(Format::Mp3))]
    #[case("take.wav", Some(Format::Wav))]
    #[case("song.flac", None)]
    #[case("README", None)]
    #[case("dir.mp3/cover", None)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: Option<Format>) {
        assert_eq!(Format::from_path(path), expected);
    }

    #[test]
    fn test_half_way_is_frame_aligned() {
        let offset = frame_aligned_offset(4_000_000, 50.0, PCM_FRAME_SIZE);
        assert_eq!(offset % PCM_FRAME_SIZE, 0);
        assert_eq!(offset, 2_000_000);
    }

    #[rstest]
    #[case::rounds_down(1_001, 50.0, 4, 500)]
    #[case::start(1_000, 0.0, 4, 0)]
    #[case::end(1_000, 100.0, 4, 1_000)]
    #[case::clamped_high(1_000, 250.0, 4, 1_000)]
    #[case::clamped_low(1_000, -3.0, 4, 0)]
    #[case::nan(1_000, f64::NAN, 4, 0)]
    #[case::odd_size_end(1_003, 100.0, 4, 1_000)]
    #[case::empty(0, 50.0, 4, 0)]
    fn test_frame_aligned_offset(#[case] size: u64, #[case] percent: f64, #[case] frame: u64, #[case] expected: u64) {
        assert_eq!(frame_aligned_offset(size, percent, frame), expected);
    }
}
