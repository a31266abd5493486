//! Frame synchronisation
//!
//! Locates frame boundaries in a raw MPEG byte stream. The first frame is
//! only trusted when the header right after it also syncs; from then on
//! every header must agree with the first one on the fixed stream bits.

use crate::codec::header::{FrameHeader, HEADER_LEN};
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// One located frame, header included.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// Byte offset of the header within the stream
    pub offset: usize,
    /// Header plus body bytes
    pub data: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Frame bytes after the 4-byte header
    pub fn body(&self) -> &'a [u8] {
        &self.data[HEADER_LEN..]
    }
}

#[derive(Debug, Clone, Copy)]
enum SyncMode {
    /// No frame accepted yet
    Initial,
    /// Locked to the stream of this first header
    Strict(FrameHeader),
}

/// Iterator-like frame locator over a complete byte stream.
pub struct FrameSync<'a> {
    data: &'a [u8],
    pos: usize,
    mode: SyncMode,
    max_scan: usize,
    skipped: usize,
}

impl<'a> FrameSync<'a> {
    /// Build a locator; a leading ID3v2 tag is skipped.
    pub fn new(data: &'a [u8], max_scan: usize) -> Self {
        let pos = id3v2_len(data).min(data.len());
        if pos > 0 {
            debug!("Skipping {} byte ID3v2 tag", pos);
        }

        Self {
            data,
            pos,
            mode: SyncMode::Initial,
            max_scan,
            skipped: 0,
        }
    }

    /// Next frame, or `None` at end of stream.
    ///
    /// Fails with `Error::MalformedStream` when no frame is found within the
    /// configured scan window.
    pub fn next_frame(&mut self) -> Result<Option<Frame<'a>>> {
        let scan_start = self.pos;

        loop {
            let scanned = self.pos - scan_start;
            if scanned > self.max_scan {
                return Err(Error::MalformedStream(format!(
                    "no frame sync within {} bytes at offset {}",
                    self.max_scan, scan_start
                )));
            }

            let Some(word) = self.word_at(self.pos) else {
                if self.pos < self.data.len() {
                    debug!("Ignoring {} trailing bytes", self.data.len() - self.pos);
                }
                self.pos = self.data.len();
                return Ok(None);
            };

            match self.candidate(word) {
                Candidate::Accept(header) => {
                    if scanned > 0 {
                        self.skipped += scanned;
                        if matches!(self.mode, SyncMode::Strict(_)) {
                            warn!("Resynchronised after skipping {} bytes at offset {}", scanned, scan_start);
                        } else {
                            debug!("First frame found after {} bytes", scanned);
                        }
                    }
                    if matches!(self.mode, SyncMode::Initial) {
                        self.mode = SyncMode::Strict(header);
                    }

                    let offset = self.pos;
                    let end = offset + header.frame_length();
                    self.pos = end;
                    return Ok(Some(Frame {
                        header,
                        offset,
                        data: &self.data[offset..end],
                    }));
                }
                Candidate::Truncated => {
                    debug!(
                        "Stream ends inside a frame at offset {} ({} bytes left)",
                        self.pos,
                        self.data.len() - self.pos
                    );
                    self.pos = self.data.len();
                    return Ok(None);
                }
                Candidate::Reject => self.pos += 1,
            }
        }
    }

    /// Current byte offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes skipped while searching for sync
    pub fn bytes_skipped(&self) -> usize {
        self.skipped
    }

    fn word_at(&self, pos: usize) -> Option<u32> {
        let b = self.data.get(pos..pos + HEADER_LEN)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn candidate(&self, word: u32) -> Candidate {
        if !FrameHeader::has_sync(word) {
            return Candidate::Reject;
        }
        let Ok(header) = FrameHeader::parse(word) else {
            return Candidate::Reject;
        };

        let end = self.pos + header.frame_length();
        match self.mode {
            SyncMode::Strict(first) => {
                if !first.matches_stream(&header) {
                    Candidate::Reject
                } else if end > self.data.len() {
                    // A real frame further on means this header is noise
                    if self.frame_follows(self.pos + 1, &first) {
                        Candidate::Reject
                    } else {
                        Candidate::Truncated
                    }
                } else {
                    Candidate::Accept(header)
                }
            }
            SyncMode::Initial => {
                if end == self.data.len() {
                    return Candidate::Accept(header);
                }
                let next = self
                    .word_at(end)
                    .filter(|w| FrameHeader::has_sync(*w))
                    .and_then(|w| FrameHeader::parse(w).ok());
                match next {
                    Some(next) if header.matches_stream(&next) => Candidate::Accept(header),
                    _ => Candidate::Reject,
                }
            }
        }
    }

    /// Whether a complete frame of the locked stream starts in `from..`,
    /// looking at most `max_scan` bytes ahead.
    fn frame_follows(&self, from: usize, first: &FrameHeader) -> bool {
        let last = self.data.len().saturating_sub(HEADER_LEN).min(from + self.max_scan);
        (from..=last).any(|pos| {
            self.word_at(pos)
                .filter(|w| FrameHeader::has_sync(*w))
                .and_then(|w| FrameHeader::parse(w).ok())
                .is_some_and(|h| first.matches_stream(&h) && pos + h.frame_length() <= self.data.len())
        })
    }
}

enum Candidate {
    Accept(FrameHeader),
    Truncated,
    Reject,
}

/// Length of a leading ID3v2 tag, or 0.
pub fn id3v2_len(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MPEG-1 Layer III 128 kbps 44.1 kHz joint stereo: 417 byte frames
    fn frame() -> Vec<u8> {
        let mut f = vec![0u8; 417];
        f[..4].copy_from_slice(&0xFFFB_9064u32.to_be_bytes());
        f
    }

    fn stream(frames: usize) -> Vec<u8> {
        (0..frames).flat_map(|_| frame()).collect()
    }

    #[test]
    fn test_locates_consecutive_frames() {
        let data = stream(3);
        let mut sync = FrameSync::new(&data, 1024);

        for i in 0..3 {
            let frame = sync.next_frame().unwrap().unwrap();
            assert_eq!(frame.offset, i * 417);
            assert_eq!(frame.data.len(), 417);
        }
        assert!(sync.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_leading_garbage_and_id3_are_skipped() {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x05hello".to_vec();
        data.extend_from_slice(&[0xFF, 0xFB, 0x00, 0x12, 0x34]);
        data.extend(stream(2));

        let mut sync = FrameSync::new(&data, 1024);
        let first = sync.next_frame().unwrap().unwrap();
        assert_eq!(first.offset, 15 + 5);
        assert_eq!(sync.bytes_skipped(), 5);
    }

    #[test]
    fn test_false_sync_without_follower_is_rejected() {
        // A valid-looking header whose successor position holds zeros
        let mut data = vec![0xFF, 0xFB, 0x90, 0x64];
        data.extend(vec![0u8; 500]);
        data.extend(stream(2));

        let mut sync = FrameSync::new(&data, 4096);
        let first = sync.next_frame().unwrap().unwrap();
        assert_eq!(first.offset, 504);
    }

    #[test]
    fn test_scan_limit_is_malformed_stream() {
        let data = vec![0x11u8; 10_000];
        let mut sync = FrameSync::new(&data, 512);
        assert!(matches!(sync.next_frame(), Err(Error::MalformedStream(_))));
    }

    #[test]
    fn test_short_input_is_end_of_stream() {
        let data = vec![0x11u8; 100];
        let mut sync = FrameSync::new(&data, 512);
        assert!(sync.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_trailing_partial_frame_ends_stream() {
        let mut data = stream(2);
        data.extend_from_slice(&frame()[..200]);

        let mut sync = FrameSync::new(&data, 1024);
        assert!(sync.next_frame().unwrap().is_some());
        assert!(sync.next_frame().unwrap().is_some());
        assert!(sync.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_overlong_false_header_does_not_end_stream() {
        let mut data = stream(2);
        // Same stream at 320 kbps: its 1044 byte frame would run past the end
        data.extend_from_slice(&0xFFFB_E064u32.to_be_bytes());
        data.extend(vec![0u8; 10]);
        data.extend(stream(2));

        let mut sync = FrameSync::new(&data, 4096);
        let offsets: Vec<usize> = std::iter::from_fn(|| sync.next_frame().unwrap())
            .map(|f| f.offset)
            .collect();
        assert_eq!(offsets, vec![0, 417, 848, 1265]);
        assert_eq!(sync.bytes_skipped(), 14);
    }

    #[test]
    fn test_strict_mode_rejects_foreign_headers() {
        let mut data = stream(2);
        // Mono header of the same layer between stereo frames
        let mut mono = frame();
        mono[3] = 0xC4;
        data.extend(mono);
        data.extend(frame());

        let mut sync = FrameSync::new(&data, 4096);
        let offsets: Vec<usize> = std::iter::from_fn(|| sync.next_frame().unwrap())
            .map(|f| f.offset)
            .collect();
        assert_eq!(offsets, vec![0, 417, 1251]);
    }

    #[test]
    fn test_id3v2_len() {
        assert_eq!(id3v2_len(b"ID3\x03\x00\x00\x00\x00\x02\x01rest"), 10 + 257);
        assert_eq!(id3v2_len(b"ID3\x04\x00\x10\x00\x00\x00\x00"), 20);
        assert_eq!(id3v2_len(b"\xFF\xFB\x90\x64"), 0);
    }
}
