//! Synthetic MPEG audio frames
//!
//! Frames are built field by field so tests control exactly what the
//! decoder sees: allocations, scalefactors, CRC words, VBR tags.

use metro_audio::codec::bitstream::Crc16;

const SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];
const LAYER1_KBPS: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const LAYER2_KBPS: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const LAYER3_KBPS: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];

/// MSB-first bit packer
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, value: u32, width: u32) {
        for i in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Feed every written bit to `crc`
    pub fn feed(&self, crc: &mut Crc16) {
        for i in 0..self.bits {
            let bit = (self.bytes[i / 8] >> (7 - i % 8)) & 1;
            crc.add_bits(bit as u32, 1);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// MPEG-1 frame parameters
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub layer: u8,
    pub bitrate_index: u32,
    pub sample_rate_index: u32,
    pub mono: bool,
    /// Joint stereo mode extension; the intensity bound is `4 * (ext + 1)`
    pub joint: Option<u32>,
    pub padded: bool,
    pub crc: bool,
}

impl FrameSpec {
    pub fn new(layer: u8, bitrate_index: u32, mono: bool) -> Self {
        Self {
            layer,
            bitrate_index,
            sample_rate_index: 0,
            mono,
            joint: None,
            padded: false,
            crc: false,
        }
    }

    pub fn joint_stereo(mut self, mode_extension: u32) -> Self {
        self.mono = false;
        self.joint = Some(mode_extension);
        self
    }

    pub fn stereo_bound(&self) -> usize {
        match self.joint {
            Some(ext) => 4 * (ext as usize + 1),
            None => 32,
        }
    }

    pub fn with_crc(mut self) -> Self {
        self.crc = true;
        self
    }

    pub fn padded(mut self) -> Self {
        self.padded = true;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }

    pub fn channels(&self) -> usize {
        if self.mono {
            1
        } else {
            2
        }
    }

    pub fn samples_per_frame(&self) -> usize {
        if self.layer == 1 {
            384
        } else {
            1152
        }
    }

    pub fn header_word(&self) -> u32 {
        let layer_bits = match self.layer {
            1 => 0b11,
            2 => 0b10,
            _ => 0b01,
        };
        let (mode, extension) = match (self.mono, self.joint) {
            (true, _) => (0b11, 0),
            (false, Some(ext)) => (0b01, ext),
            (false, None) => (0b00, 0),
        };
        0xFFE0_0000
            | (0b11 << 19)
            | (layer_bits << 17)
            | ((!self.crc as u32) << 16)
            | (self.bitrate_index << 12)
            | (self.sample_rate_index << 10)
            | ((self.padded as u32) << 9)
            | (mode << 6)
            | (extension << 4)
    }

    pub fn frame_len(&self) -> usize {
        let rate = self.sample_rate();
        let pad = self.padded as u32;
        let len = match self.layer {
            1 => (12 * LAYER1_KBPS[self.bitrate_index as usize] * 1000 / rate + pad) * 4,
            2 => 144 * LAYER2_KBPS[self.bitrate_index as usize] * 1000 / rate + pad,
            _ => 144 * LAYER3_KBPS[self.bitrate_index as usize] * 1000 / rate + pad,
        };
        len as usize
    }

    /// Header, optional CRC word, body, zero padded to the frame length.
    pub fn assemble(&self, crc: Option<u16>, body: &[u8]) -> Vec<u8> {
        let mut frame = self.header_word().to_be_bytes().to_vec();
        if self.crc {
            frame.extend_from_slice(&crc.unwrap_or(0).to_be_bytes());
        }
        frame.extend_from_slice(body);
        assert!(frame.len() <= self.frame_len(), "body does not fit the frame");
        frame.resize(self.frame_len(), 0);
        frame
    }
}

/// CRC over the header's low 16 bits and the protected fields.
pub fn protected_crc(spec: &FrameSpec, protected: &BitWriter) -> u16 {
    let mut crc = Crc16::new();
    crc.add_bits(spec.header_word() & 0xFFFF, 16);
    protected.feed(&mut crc);
    crc.checksum()
}

/// Layer I frame with subband 0 toggling between two levels every block.
///
/// With `corrupt_crc` the stored checksum is deliberately wrong.
pub fn layer1_tone_frame(spec: &FrameSpec, corrupt_crc: bool) -> Vec<u8> {
    // Scalefactor index 3 is unity gain
    layer1_frame_with_scalefactor(spec, 3, corrupt_crc)
}

/// Layer I tone frame whose subband 0 uses scalefactor `index`.
///
/// Index 63 is reserved, which makes the frame undecodable.
pub fn layer1_frame_with_scalefactor(spec: &FrameSpec, index: u32, corrupt_crc: bool) -> Vec<u8> {
    assert_eq!(spec.layer, 1);
    let channels = spec.channels();

    let mut allocation = BitWriter::new();
    for sb in 0..32 {
        for _ in 0..channels {
            allocation.put(if sb == 0 { 3 } else { 0 }, 4);
        }
    }

    let mut body = allocation.clone();
    for _ in 0..channels {
        body.put(index, 6);
    }
    for block in 0..12 {
        for _ in 0..channels {
            body.put(if block % 2 == 0 { 14 } else { 0 }, 4);
        }
    }

    let crc = protected_crc(spec, &allocation);
    let stored = if corrupt_crc { !crc } else { crc };
    spec.assemble(Some(stored), &body.into_bytes())
}

/// Layer I frame with every allocation zero.
pub fn layer1_silent_frame(spec: &FrameSpec) -> Vec<u8> {
    assert_eq!(spec.layer, 1);
    let mut allocation = BitWriter::new();
    for _ in 0..32 * spec.channels() {
        allocation.put(0, 4);
    }
    let crc = protected_crc(spec, &allocation);
    spec.assemble(Some(crc), &[])
}

/// Layer II frame with every allocation zero.
pub fn layer2_silent_frame(spec: &FrameSpec) -> Vec<u8> {
    assert_eq!(spec.layer, 2);
    spec.assemble(None, &[])
}

/// Allocation field width of subband `sb` in the 27-band table (B.2a).
fn layer2_nbal(sb: usize) -> u32 {
    match sb {
        0..=10 => 4,
        11..=22 => 3,
        _ => 2,
    }
}

/// Joint stereo Layer II frame (bound 4, 27 subbands) exercising three
/// quantiser classes:
///
/// - subband 0, per channel: 7 levels, three 3-bit codes
/// - subband 3, per channel: 9 levels, grouped 10-bit codes
/// - subband 5, shared above the bound: 5 levels, grouped 7-bit codes
///
/// Each allocated band/channel uses a different scfsi pattern.
pub fn layer2_tone_frame(spec: &FrameSpec) -> Vec<u8> {
    assert_eq!(spec.layer, 2);
    assert_eq!(spec.joint, Some(0), "bound 4 expected");
    let per_channel = LAYER2_KBPS[spec.bitrate_index as usize] / 2;
    assert!(per_channel > 48 && per_channel <= 80, "27-band table expected");

    // Allocation values: sb0 → 7 levels, sb3 → 9 levels, sb5 → 5 levels
    let mut protected = BitWriter::new();
    for sb in 0..27 {
        let value = match sb {
            0 => 2,
            3 => 4,
            5 => 2,
            _ => 0,
        };
        let fields = if sb < spec.stereo_bound() { 2 } else { 1 };
        for _ in 0..fields {
            protected.put(value, layer2_nbal(sb));
        }
    }

    // scfsi per (band, channel) followed by the scalefactors it implies
    let scfsi = [(0, 1), (2, 3), (2, 2)];
    for (ch0, ch1) in scfsi {
        protected.put(ch0, 2);
        protected.put(ch1, 2);
    }

    let mut body = protected.clone();
    let scalefactors: [[&[u32]; 2]; 3] = [[&[3, 4, 5], &[6, 7]], [&[3], &[2, 4]], [&[5], &[8]]];
    for band in scalefactors {
        for indices in band {
            for index in indices {
                body.put(*index, 6);
            }
        }
    }

    for granule in 0..12u32 {
        // sb0: 7-level codes swinging between the extremes
        for ch in 0..2u32 {
            for s in 0..3u32 {
                body.put(if (granule + s + ch) % 2 == 0 { 6 } else { 0 }, 3);
            }
        }
        // sb3: 9-level groups, code = s0 + 9 s1 + 81 s2
        for ch in 0..2u32 {
            let (a, b, c) = ((granule + ch) % 9, 8 - granule % 9, (2 * granule) % 9);
            body.put(a + 9 * b + 81 * c, 10);
        }
        // sb5: one 5-level group shared by both channels
        let (a, b, c) = (granule % 5, 4 - granule % 5, 2);
        body.put(a + 5 * b + 25 * c, 7);
    }

    let crc = protected_crc(spec, &protected);
    spec.assemble(Some(crc), &body.into_bytes())
}

/// Layer III frame with zeroed side information and no main data.
pub fn layer3_silent_frame(spec: &FrameSpec) -> Vec<u8> {
    assert_eq!(spec.layer, 3);
    spec.assemble(None, &[])
}

/// Layer III frame carrying a Xing tag with frame and byte counts.
pub fn xing_frame(spec: &FrameSpec, frames: u32, bytes: u32) -> Vec<u8> {
    assert_eq!(spec.layer, 3);
    let side_info = if spec.mono { 17 } else { 32 };
    let mut body = vec![0u8; side_info];
    body.extend_from_slice(b"Xing");
    body.extend_from_slice(&0x0000_0003u32.to_be_bytes());
    body.extend_from_slice(&frames.to_be_bytes());
    body.extend_from_slice(&bytes.to_be_bytes());
    spec.assemble(None, &body)
}

/// `count` copies of `frame` back to back
pub fn stream_of(frame: &[u8], count: usize) -> Vec<u8> {
    frame.repeat(count)
}
