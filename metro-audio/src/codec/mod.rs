//! Audio decoding
//!
//! MPEG audio Layer I/II/III frame streams (optionally behind an ID3v2 tag)
//! and RIFF/WAVE files, detected from the leading bytes.

pub mod bitstream;
pub mod decoder;
pub mod header;
pub mod layer1;
pub mod layer2;
pub mod layer3;
pub mod pcm;
pub mod sync;
pub mod synthesis;
pub mod vbr;
pub mod wav;

pub use decoder::{DecodeStats, MpegDecoder, MpegStream, StreamInfo};
pub use header::{ChannelMode, FrameHeader, Layer, MpegVersion};
pub use vbr::{VbrInfo, VbrKind};

use crate::audio::types::DecodedClip;
use crate::config::CodecConfig;
use crate::error::Result;

/// Container of a sound resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Wav,
    Mpeg,
}

impl SourceKind {
    pub fn detect(data: &[u8]) -> Self {
        if wav::is_wav(data) {
            SourceKind::Wav
        } else {
            SourceKind::Mpeg
        }
    }
}

/// Decode a complete resource to PCM in its native format.
pub fn decode_clip(data: &[u8], config: &CodecConfig) -> Result<DecodedClip> {
    match SourceKind::detect(data) {
        SourceKind::Wav => wav::decode_wav(data),
        SourceKind::Mpeg => MpegStream::new(data, config.max_sync_scan_bytes).decode_to_end(),
    }
}
