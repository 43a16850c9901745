//! Detection of non-audio data appended after the audio stream.
//!
//! Taggers commonly append artwork and text after the audio: extra RIFF
//! chunks following a WAV `data` chunk, or ID3v1/APEv2/appended-ID3v2 tags
//! at the end of an MP3. That region is excluded from the reported track
//! size so that progress reaches 100% when the audio ends.

use std::io::{self, Read, Seek, SeekFrom};

const ID3V1_LEN: u64 = 128;
const APE_FOOTER_LEN: u64 = 32;
const ID3V2_FOOTER_LEN: u64 = 10;
// Enough for a tag chain such as APEv2 + ID3v1; guards against a
// corrupt footer sending us round in circles.
const MAX_TAGS: usize = 4;

/// Number of trailing non-audio bytes in `source`.
///
/// The source position afterwards is unspecified.
pub fn trailing_len<R: Read + Seek>(source: &mut R) -> io::Result<u64> {
    let len = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; 12];
    if read_exact_at(source, 0, &mut header)? && &header[..4] == b"RIFF" && &header[8..] == b"WAVE" {
        return riff_trailing_len(source, len);
    }
    tag_trailing_len(source, len)
}

/// Read `buf.len()` bytes at `offset`; `false` if the source is too short.
fn read_exact_at<R: Read + Seek>(source: &mut R, offset: u64, buf: &mut [u8]) -> io::Result<bool> {
    source.seek(SeekFrom::Start(offset))?;
    match source.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Everything after the `data` chunk of a RIFF/WAVE file.
fn riff_trailing_len<R: Read + Seek>(source: &mut R, len: u64) -> io::Result<u64> {
    let mut offset = 12;
    let mut chunk = [0u8; 8];
    while read_exact_at(source, offset, &mut chunk)? {
        let size = u64::from(u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]));
        let body = offset + 8;
        if &chunk[..4] == b"data" {
            // Streaming writers leave the size at 0 or u32::MAX: audio runs to EOF.
            let end = body + size + (size & 1);
            return Ok(if size == 0 || end > len { 0 } else { len - end });
        }
        offset = body + size + (size & 1);
    }
    Ok(0)
}

/// Total size of the tags chained at the end of the file.
fn tag_trailing_len<R: Read + Seek>(source: &mut R, len: u64) -> io::Result<u64> {
    let mut end = len;
    for _ in 0..MAX_TAGS {
        let Some(tag) = tag_before(source, end)? else {
            break;
        };
        end -= tag;
    }
    Ok(len - end)
}

/// Length of a tag ending exactly at `end`, if there is one.
fn tag_before<R: Read + Seek>(source: &mut R, end: u64) -> io::Result<Option<u64>> {
    if end >= ID3V1_LEN {
        let mut magic = [0u8; 3];
        if read_exact_at(source, end - ID3V1_LEN, &mut magic)? && &magic == b"TAG" {
            return Ok(Some(ID3V1_LEN));
        }
    }
    if end >= APE_FOOTER_LEN {
        let mut footer = [0u8; 32];
        if read_exact_at(source, end - APE_FOOTER_LEN, &mut footer)? && &footer[..8] == b"APETAGEX" {
            // Size covers items + footer; the optional header is extra.
            let size = u64::from(u32::from_le_bytes([footer[12], footer[13], footer[14], footer[15]]));
            let flags = u32::from_le_bytes([footer[20], footer[21], footer[22], footer[23]]);
            let header = if flags & (1 << 31) != 0 { APE_FOOTER_LEN } else { 0 };
            let total = size + header;
            return Ok((total >= APE_FOOTER_LEN && total <= end).then_some(total));
        }
    }
    if end >= ID3V2_FOOTER_LEN {
        let mut footer = [0u8; 10];
        if read_exact_at(source, end - ID3V2_FOOTER_LEN, &mut footer)? && &footer[..3] == b"3DI" {
            let size = footer[6..10].iter().fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7f));
            let total = size + 2 * ID3V2_FOOTER_LEN;
            return Ok((total <= end).then_some(total));
        }
    }
    Ok(None)
}
