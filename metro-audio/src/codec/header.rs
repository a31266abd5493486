//! MPEG audio frame header
//!
//! A header is the 32-bit word in front of every frame. It is parsed fresh
//! for each frame since VBR streams change bitrate and padding as they go.

use crate::error::{Error, Result};
use std::fmt;

/// Header length in bytes
pub const HEADER_LEN: usize = 4;

/// Mask of the bits that stay fixed across a well-formed stream: sync,
/// version, layer and sample rate.
pub const STRICT_SYNC_MASK: u32 = 0xFFFE_0C00;

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_LSF: [[u32; 15]; 3] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44100, 48000, 32000],
    [22050, 24000, 16000],
    [11025, 12000, 8000],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

impl MpegVersion {
    fn table_row(self) -> usize {
        match self {
            MpegVersion::Mpeg1 => 0,
            MpegVersion::Mpeg2 => 1,
            MpegVersion::Mpeg25 => 2,
        }
    }

    /// MPEG-2 and 2.5 use the low sampling frequency tables
    pub fn is_lsf(self) -> bool {
        self != MpegVersion::Mpeg1
    }
}

impl fmt::Display for MpegVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MpegVersion::Mpeg1 => "MPEG-1",
            MpegVersion::Mpeg2 => "MPEG-2",
            MpegVersion::Mpeg25 => "MPEG-2.5",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

impl Layer {
    fn index(self) -> usize {
        match self {
            Layer::I => 0,
            Layer::II => 1,
            Layer::III => 2,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::I => "Layer I",
            Layer::II => "Layer II",
            Layer::III => "Layer III",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

impl ChannelMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        }
    }
}

/// One parsed frame header plus the sizes derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw header word as read from the stream
    pub word: u32,
    pub version: MpegVersion,
    pub layer: Layer,
    pub bitrate_index: u8,
    pub sample_rate_index: u8,
    pub channel_mode: ChannelMode,
    pub mode_extension: u8,
    pub has_crc: bool,
    pub padded: bool,
    pub copyright: bool,
    pub original: bool,
    pub emphasis: u8,
    /// Bytes following the 4-byte header
    pub frame_size: usize,
    /// Layer III main data bytes in this frame; payload bytes otherwise
    pub slot_count: usize,
    /// Subbands carrying allocation information
    pub subbands: usize,
}

impl FrameHeader {
    /// True when the top 11 bits are the frame sync pattern.
    pub fn has_sync(word: u32) -> bool {
        word >> 21 == 0x7FF
    }

    /// Parse a header word. Free-format and reserved field values are
    /// rejected with `Error::Decode`.
    pub fn parse(word: u32) -> Result<Self> {
        if !Self::has_sync(word) {
            return Err(Error::Decode(format!("no frame sync in {:08X}", word)));
        }

        let version = match (word >> 19) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return Err(Error::Decode("reserved MPEG version".into())),
        };

        let layer = match (word >> 17) & 0b11 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return Err(Error::Decode("reserved layer".into())),
        };

        let has_crc = (word >> 16) & 1 == 0;
        let bitrate_index = ((word >> 12) & 0xF) as u8;
        match bitrate_index {
            0 => return Err(Error::Decode("free-format bitrate is not supported".into())),
            15 => return Err(Error::Decode("invalid bitrate index 15".into())),
            _ => {}
        }

        let sample_rate_index = ((word >> 10) & 0b11) as u8;
        if sample_rate_index == 3 {
            return Err(Error::Decode("reserved sample rate".into()));
        }

        let mut header = FrameHeader {
            word,
            version,
            layer,
            bitrate_index,
            sample_rate_index,
            channel_mode: ChannelMode::from_bits(word >> 6),
            mode_extension: ((word >> 4) & 0b11) as u8,
            has_crc,
            padded: (word >> 9) & 1 == 1,
            copyright: (word >> 3) & 1 == 1,
            original: (word >> 2) & 1 == 1,
            emphasis: (word & 0b11) as u8,
            frame_size: 0,
            slot_count: 0,
            subbands: 0,
        };

        header.frame_size = header.compute_frame_size();
        header.slot_count = header.compute_slot_count();
        header.subbands = header.compute_subbands();

        Ok(header)
    }

    /// Bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        let table = if self.version.is_lsf() {
            &BITRATES_LSF
        } else {
            &BITRATES_V1
        };
        table[self.layer.index()][self.bitrate_index as usize] * 1000
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.version.table_row()][self.sample_rate_index as usize]
    }

    pub fn channels(&self) -> u16 {
        if self.channel_mode == ChannelMode::Mono {
            1
        } else {
            2
        }
    }

    /// PCM frames produced by one MPEG frame
    pub fn samples_per_frame(&self) -> usize {
        match self.layer {
            Layer::I => 384,
            Layer::II => 1152,
            Layer::III if self.version.is_lsf() => 576,
            Layer::III => 1152,
        }
    }

    /// Header plus body length in bytes
    pub fn frame_length(&self) -> usize {
        self.frame_size + HEADER_LEN
    }

    /// Layer III side information length in bytes
    pub fn side_info_size(&self) -> usize {
        match (self.version.is_lsf(), self.channel_mode == ChannelMode::Mono) {
            (false, true) => 17,
            (false, false) => 32,
            (true, true) => 9,
            (true, false) => 17,
        }
    }

    /// First subband coded as joint stereo (Layer I/II intensity bound).
    pub fn stereo_bound(&self) -> usize {
        if self.channel_mode == ChannelMode::JointStereo {
            (self.mode_extension as usize + 1) * 4
        } else {
            self.subbands
        }
    }

    /// Bits of the header word a strict-mode resync compares against.
    pub fn strict_sync_word(&self) -> u32 {
        self.word & STRICT_SYNC_MASK
    }

    /// True when `other` could belong to the same stream as this header.
    pub fn matches_stream(&self, other: &FrameHeader) -> bool {
        other.strict_sync_word() == self.strict_sync_word()
            && (other.channel_mode == ChannelMode::Mono) == (self.channel_mode == ChannelMode::Mono)
    }

    fn compute_frame_size(&self) -> usize {
        let bitrate = self.bitrate() as usize;
        let sample_rate = self.sample_rate() as usize;
        let padding = usize::from(self.padded);

        match self.layer {
            Layer::I => ((12 * bitrate) / sample_rate + padding) * 4 - HEADER_LEN,
            Layer::II => (144 * bitrate) / sample_rate + padding - HEADER_LEN,
            Layer::III => {
                let mut size = (144 * bitrate) / sample_rate;
                if self.version.is_lsf() {
                    size >>= 1;
                }
                size + padding - HEADER_LEN
            }
        }
    }

    fn compute_slot_count(&self) -> usize {
        let crc = if self.has_crc { 2 } else { 0 };
        match self.layer {
            Layer::III => self.frame_size.saturating_sub(self.side_info_size() + crc),
            _ => self.frame_size.saturating_sub(crc),
        }
    }

    fn compute_subbands(&self) -> usize {
        if self.layer != Layer::II {
            return 32;
        }
        if self.version.is_lsf() {
            return 30;
        }

        let per_channel_kbps = self.bitrate() / 1000 / self.channels() as u32;
        if per_channel_kbps <= 48 {
            if self.sample_rate() == 32000 {
                12
            } else {
                8
            }
        } else if per_channel_kbps <= 80 || self.sample_rate() == 48000 {
            27
        } else {
            30
        }
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {} kbps, {} Hz, {:?}{}",
            self.version,
            self.layer,
            self.bitrate() / 1000,
            self.sample_rate(),
            self.channel_mode,
            if self.has_crc { ", CRC" } else { "" }
        )
    }
}
