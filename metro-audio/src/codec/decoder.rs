//! MPEG audio stream decoder
//!
//! `MpegDecoder` turns located frames into PCM. It starts without any
//! per-stream state; the first frame fixes layer, sample rate and channel
//! count, and allocates a `DecoderContext` holding the layer engine and one
//! synthesis filter per channel. The context lives as long as the stream.
//!
//! `MpegStream` couples the decoder with frame sync and VBR tag handling and
//! is what the rest of the crate uses.

use crate::audio::types::{AudioFormat, DecodedClip};
use crate::codec::bitstream::Crc16;
use crate::codec::header::{FrameHeader, Layer};
use crate::codec::layer1::Layer1Decoder;
use crate::codec::layer2::Layer2Decoder;
use crate::codec::layer3::Layer3Decoder;
use crate::codec::pcm::PcmSink;
use crate::codec::sync::{Frame, FrameSync};
use crate::codec::synthesis::SynthesisFilter;
use crate::codec::vbr::{estimate_duration, VbrInfo};
use crate::error::{Error, Result};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of checking a frame's CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Absent,
    Match,
    Mismatch,
}

/// Decoding of one layer. Implementations read only within the frame they
/// are given and write interleaved samples to the sink.
pub trait LayerDecoder {
    fn decode_frame(
        &mut self,
        frame: &Frame<'_>,
        filters: &mut [SynthesisFilter],
        sink: &mut PcmSink,
    ) -> Result<CrcStatus>;
}

pub(crate) fn finish_crc(crc: Option<Crc16>, stored: Option<u16>) -> CrcStatus {
    match (crc, stored) {
        (Some(crc), Some(stored)) if crc.checksum() == stored => CrcStatus::Match,
        (Some(_), Some(_)) => CrcStatus::Mismatch,
        _ => CrcStatus::Absent,
    }
}

/// Layer I/II scalefactor for a 6-bit index: `2^(1 - index/3)`.
///
/// Index 63 is reserved.
pub fn scalefactor(index: u32) -> Result<f32> {
    static TABLE: OnceLock<[f32; 63]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut table = [0.0f32; 63];
        for (i, value) in table.iter_mut().enumerate() {
            *value = 2f64.powf(1.0 - i as f64 / 3.0) as f32;
        }
        table
    });

    table
        .get(index as usize)
        .copied()
        .ok_or_else(|| Error::Decode(format!("invalid scalefactor index {}", index)))
}

/// Map a quantised code of an `levels`-step quantiser onto `(-1, 1)`.
#[inline]
pub fn requantize(code: u32, levels: u32) -> f32 {
    (2.0 * code as f32 - (levels as f32 - 1.0)) / levels as f32
}

/// Counters kept across a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames_decoded: usize,
    pub frames_skipped: usize,
    pub crc_mismatches: usize,
    pub bytes_skipped: usize,
}

/// Per-stream decoder state, created from the first frame.
struct DecoderContext {
    layer: Layer,
    sample_rate: u32,
    channels: u16,
    engine: Box<dyn LayerDecoder>,
    filters: Vec<SynthesisFilter>,
}

impl DecoderContext {
    fn new(header: &FrameHeader) -> Self {
        let engine: Box<dyn LayerDecoder> = match header.layer {
            Layer::I => Box::new(Layer1Decoder::new()),
            Layer::II => Box::new(Layer2Decoder::new()),
            Layer::III => Box::new(Layer3Decoder::new()),
        };

        Self {
            layer: header.layer,
            sample_rate: header.sample_rate(),
            channels: header.channels(),
            engine,
            filters: vec![SynthesisFilter::new(); header.channels() as usize],
        }
    }

    fn accepts(&self, header: &FrameHeader) -> bool {
        header.layer == self.layer
            && header.sample_rate() == self.sample_rate
            && header.channels() == self.channels
    }
}

/// Frame-to-PCM decoder for one stream.
pub struct MpegDecoder {
    context: Option<DecoderContext>,
    stats: DecodeStats,
}

impl MpegDecoder {
    pub fn new() -> Self {
        Self {
            context: None,
            stats: DecodeStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Output format, once the first frame has been seen
    pub fn format(&self) -> Option<AudioFormat> {
        self.context
            .as_ref()
            .map(|ctx| AudioFormat::new(ctx.sample_rate, ctx.channels))
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode one frame into `sink`.
    ///
    /// On error nothing is written to the sink and the error is counted as a
    /// skipped frame; decoding can continue with the next frame.
    pub fn decode_frame(&mut self, frame: &Frame<'_>, sink: &mut PcmSink) -> Result<()> {
        let header = &frame.header;
        let context = self.context.get_or_insert_with(|| {
            debug!("Decoder initialised from first frame: {}", header);
            DecoderContext::new(header)
        });

        if !context.accepts(header) {
            self.stats.frames_skipped += 1;
            return Err(Error::Decode(format!(
                "frame at offset {} ({}) does not match the stream",
                frame.offset, header
            )));
        }

        let mark = sink.len();
        match context.engine.decode_frame(frame, &mut context.filters, sink) {
            Ok(crc) => {
                if crc == CrcStatus::Mismatch {
                    self.stats.crc_mismatches += 1;
                    warn!("CRC mismatch in frame at offset {}", frame.offset);
                }
                self.stats.frames_decoded += 1;
                Ok(())
            }
            Err(e) => {
                sink.truncate(mark);
                self.stats.frames_skipped += 1;
                Err(e)
            }
        }
    }
}

impl Default for MpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a stream for diagnostics
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub first_header: FrameHeader,
    pub vbr: Option<VbrInfo>,
    pub estimated_duration: Duration,
    pub format: AudioFormat,
}

/// Frame sync, VBR tag detection and decoding over one byte stream.
pub struct MpegStream<'a> {
    data: &'a [u8],
    sync: FrameSync<'a>,
    decoder: MpegDecoder,
    first: Option<(FrameHeader, usize)>,
    vbr: Option<VbrInfo>,
}

impl<'a> MpegStream<'a> {
    pub fn new(data: &'a [u8], max_scan: usize) -> Self {
        Self {
            data,
            sync: FrameSync::new(data, max_scan),
            decoder: MpegDecoder::new(),
            first: None,
            vbr: None,
        }
    }

    /// Decode the next audio frame into `sink`.
    ///
    /// Returns `Ok(false)` at end of stream. Frames that fail to decode are
    /// logged and skipped; sync loss is returned as an error.
    pub fn decode_next(&mut self, sink: &mut PcmSink) -> Result<bool> {
        loop {
            let Some(frame) = self.sync.next_frame()? else {
                return Ok(false);
            };

            if self.first.is_none() {
                self.first = Some((frame.header, frame.offset));
                if self.inspect_vbr_tag(&frame) {
                    continue;
                }
            }

            match self.decoder.decode_frame(&frame, sink) {
                Ok(()) => return Ok(true),
                Err(e) if e.is_frame_local() => {
                    warn!("Skipping frame at offset {}: {}", frame.offset, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// True when the first frame is a VBR tag frame holding no audio.
    fn inspect_vbr_tag(&mut self, frame: &Frame<'_>) -> bool {
        if frame.header.layer != Layer::III {
            return false;
        }
        match VbrInfo::parse(&frame.header, frame.data) {
            Ok(Some(info)) => {
                debug!(
                    "{:?} tag: frames={:?} bytes={:?}",
                    info.kind, info.frame_count, info.byte_count
                );
                self.vbr = Some(info);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("{}; estimating duration as constant bitrate", e);
                false
            }
        }
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.decoder.format()
    }

    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            bytes_skipped: self.sync.bytes_skipped(),
            ..self.decoder.stats()
        }
    }

    pub fn vbr_info(&self) -> Option<&VbrInfo> {
        self.vbr.as_ref()
    }

    /// Stream summary, available once a frame has been decoded
    pub fn info(&self) -> Option<StreamInfo> {
        let (first_header, first_offset) = self.first?;
        let format = self.format()?;
        let audio_bytes = self.data.len().saturating_sub(first_offset);

        Some(StreamInfo {
            first_header,
            vbr: self.vbr.clone(),
            estimated_duration: estimate_duration(&first_header, self.vbr.as_ref(), audio_bytes),
            format,
        })
    }

    /// Decode everything that is left into one clip.
    ///
    /// Fails with `Error::MalformedStream` when not a single frame decodes.
    pub fn decode_to_end(&mut self) -> Result<DecodedClip> {
        let mut sink = PcmSink::new();
        while self.decode_next(&mut sink)? {}

        let stats = self.stats();
        let format = match self.format() {
            Some(format) if stats.frames_decoded > 0 => format,
            _ => {
                return Err(Error::MalformedStream(format!(
                    "no decodable frames ({} skipped)",
                    stats.frames_skipped
                )))
            }
        };

        debug!(
            "Decoded {} frames ({} skipped, {} CRC mismatches, {} bytes resynced) as {}",
            stats.frames_decoded, stats.frames_skipped, stats.crc_mismatches, stats.bytes_skipped, format
        );
        Ok(sink.into_clip(format))
    }
}
