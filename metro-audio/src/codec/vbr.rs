//! Variable-bitrate side headers (Xing/Info and VBRI)
//!
//! Encoders put one of these in the first frame of a VBR stream. The frame
//! holds no audio; its tag gives the total frame count, which is the only
//! reliable way to estimate the duration of a VBR stream without a full scan.

use crate::codec::header::{ChannelMode, FrameHeader, HEADER_LEN};
use crate::error::{Error, Result};
use std::time::Duration;

const XING_FRAMES_FLAG: u32 = 0x1;
const XING_BYTES_FLAG: u32 = 0x2;
const XING_TOC_FLAG: u32 = 0x4;
const XING_SCALE_FLAG: u32 = 0x8;

/// Offset of the VBRI tag after the header
const VBRI_OFFSET: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbrKind {
    /// Xing tag of a VBR stream
    Xing,
    /// Xing-layout tag LAME writes into CBR streams
    Info,
    /// Fraunhofer tag
    Vbri,
}

/// Contents of a VBR side header. Fields absent from the tag are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbrInfo {
    pub kind: VbrKind,
    pub frame_count: Option<u32>,
    pub byte_count: Option<u32>,
    pub scale: Option<u32>,
    pub toc: Option<[u8; 100]>,
}

impl VbrInfo {
    /// Look for a VBR tag in a complete frame (header included).
    ///
    /// Returns `Ok(None)` when the frame carries no tag and
    /// `Error::CorruptVbrHeader` when a tag is present but cut short.
    pub fn parse(header: &FrameHeader, frame: &[u8]) -> Result<Option<Self>> {
        let xing_offset = HEADER_LEN + xing_offset(header);
        if let Some(id) = frame.get(xing_offset..xing_offset + 4) {
            let kind = match id {
                b"Xing" => Some(VbrKind::Xing),
                b"Info" => Some(VbrKind::Info),
                _ => None,
            };
            if let Some(kind) = kind {
                return parse_xing(kind, &frame[xing_offset + 4..]).map(Some);
            }
        }

        let vbri_offset = HEADER_LEN + VBRI_OFFSET;
        if frame.get(vbri_offset..vbri_offset + 4) == Some(b"VBRI".as_slice()) {
            return parse_vbri(&frame[vbri_offset + 4..]).map(Some);
        }

        Ok(None)
    }
}

/// Tag offset after the header: past the side information, plus the CRC.
fn xing_offset(header: &FrameHeader) -> usize {
    let mono = header.channel_mode == ChannelMode::Mono;
    let base = match (header.version.is_lsf(), mono) {
        (false, false) => 32,
        (false, true) => 17,
        (true, false) => 17,
        (true, true) => 9,
    };
    if header.has_crc {
        base + 2
    } else {
        base
    }
}

/// Bounds-checked cursor over the tag body.
struct TagCursor<'a> {
    data: &'a [u8],
    pos: usize,
    tag: &'static str,
}

impl<'a> TagCursor<'a> {
    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + len).ok_or_else(|| {
            Error::CorruptVbrHeader(format!(
                "{} tag truncated reading {} at byte {}",
                self.tag, field, self.pos
            ))
        })?;
        self.pos += len;
        Ok(bytes)
    }

    fn u32_be(&mut self, field: &str) -> Result<u32> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u16_be(&mut self, field: &str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

fn parse_xing(kind: VbrKind, body: &[u8]) -> Result<VbrInfo> {
    let mut cursor = TagCursor {
        data: body,
        pos: 0,
        tag: "Xing",
    };
    let flags = cursor.u32_be("flags")?;

    let mut info = VbrInfo {
        kind,
        frame_count: None,
        byte_count: None,
        scale: None,
        toc: None,
    };

    if flags & XING_FRAMES_FLAG != 0 {
        info.frame_count = Some(cursor.u32_be("frame count")?);
    }
    if flags & XING_BYTES_FLAG != 0 {
        info.byte_count = Some(cursor.u32_be("byte count")?);
    }
    if flags & XING_TOC_FLAG != 0 {
        let mut toc = [0u8; 100];
        toc.copy_from_slice(cursor.take(100, "table of contents")?);
        info.toc = Some(toc);
    }
    if flags & XING_SCALE_FLAG != 0 {
        info.scale = Some(cursor.u32_be("scale")?);
    }

    Ok(info)
}

fn parse_vbri(body: &[u8]) -> Result<VbrInfo> {
    let mut cursor = TagCursor {
        data: body,
        pos: 0,
        tag: "VBRI",
    };
    let _version = cursor.u16_be("version")?;
    let _delay = cursor.u16_be("delay")?;
    let quality = cursor.u16_be("quality")?;
    let bytes = cursor.u32_be("byte count")?;
    let frames = cursor.u32_be("frame count")?;

    Ok(VbrInfo {
        kind: VbrKind::Vbri,
        frame_count: Some(frames),
        byte_count: Some(bytes),
        scale: Some(quality as u32),
        toc: None,
    })
}

/// Estimate stream duration from the first audio frame.
///
/// Uses the VBR frame count when there is one, otherwise assumes constant
/// bitrate over `audio_bytes`.
pub fn estimate_duration(first: &FrameHeader, vbr: Option<&VbrInfo>, audio_bytes: usize) -> Duration {
    let sample_rate = first.sample_rate() as f64;

    if let Some(frames) = vbr.and_then(|v| v.frame_count) {
        let samples = frames as f64 * first.samples_per_frame() as f64;
        return Duration::from_secs_f64(samples / sample_rate);
    }

    let bitrate = first.bitrate() as f64;
    if bitrate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(audio_bytes as f64 * 8.0 / bitrate)
}
