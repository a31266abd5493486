//! Layer III decoding
//!
//! Side information is parsed and validated here, along with the frame
//! checksum and bit reservoir bookkeeping. Spectral reconstruction (Huffman
//! decoding, requantisation, stereo processing, IMDCT and the hybrid filter
//! bank) runs in symphonia's MPEG audio decoder, which is fed whole frames
//! and keeps its own copy of the reservoir.

use crate::codec::bitstream::{BitReader, Crc16};
use crate::codec::decoder::{finish_crc, CrcStatus, LayerDecoder};
use crate::codec::header::FrameHeader;
use crate::codec::pcm::PcmSink;
use crate::codec::sync::Frame;
use crate::codec::synthesis::SynthesisFilter;
use crate::error::{Error, Result};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::MpaDecoder;
use tracing::debug;

/// Largest legal `big_values`: 576 spectral lines in pairs
const MAX_BIG_VALUES: u32 = 288;

/// Side information of one granule in one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GranuleInfo {
    pub part2_3_length: u32,
    pub big_values: u32,
    pub global_gain: u32,
    pub scalefac_compress: u32,
    pub window_switching: bool,
    pub block_type: u8,
    pub mixed_block: bool,
    pub table_select: [u8; 3],
    pub subblock_gain: [u8; 3],
    pub region0_count: u8,
    pub region1_count: u8,
    pub preflag: bool,
    pub scalefac_scale: bool,
    pub count1_table: bool,
}

/// Parsed Layer III side information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideInfo {
    pub main_data_begin: usize,
    pub scfsi: [[bool; 4]; 2],
    /// `granules[gr][ch]`; MPEG-2/2.5 frames carry a single granule
    pub granules: Vec<[GranuleInfo; 2]>,
}

impl SideInfo {
    /// Parse side information from its exact byte range.
    pub fn parse(header: &FrameHeader, bytes: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(bytes);
        let channels = header.channels() as usize;
        let lsf = header.version.is_lsf();

        let main_data_begin = reader.get_bits(if lsf { 8 } else { 9 })? as usize;
        let private_bits = match (lsf, channels) {
            (false, 1) => 5,
            (false, _) => 3,
            (true, 1) => 1,
            (true, _) => 2,
        };
        reader.skip_bits(private_bits)?;

        let mut scfsi = [[false; 4]; 2];
        if !lsf {
            for band in scfsi.iter_mut().take(channels) {
                for flag in band.iter_mut() {
                    *flag = reader.get_bit()?;
                }
            }
        }

        let granule_count = if lsf { 1 } else { 2 };
        let mut granules = vec![[GranuleInfo::default(); 2]; granule_count];
        for (gr, granule) in granules.iter_mut().enumerate() {
            for (ch, info) in granule.iter_mut().enumerate().take(channels) {
                *info = parse_granule(&mut reader, lsf)?;
                validate_granule(info, gr, ch)?;
            }
        }

        Ok(SideInfo {
            main_data_begin,
            scfsi,
            granules,
        })
    }

    /// Main data bits the granules claim
    pub fn main_data_bits(&self) -> usize {
        self.granules
            .iter()
            .flat_map(|g| g.iter())
            .map(|info| info.part2_3_length as usize)
            .sum()
    }
}

fn parse_granule(reader: &mut BitReader<'_>, lsf: bool) -> Result<GranuleInfo> {
    let mut info = GranuleInfo {
        part2_3_length: reader.get_bits(12)?,
        big_values: reader.get_bits(9)?,
        global_gain: reader.get_bits(8)?,
        scalefac_compress: reader.get_bits(if lsf { 9 } else { 4 })?,
        window_switching: reader.get_bit()?,
        ..GranuleInfo::default()
    };

    if info.window_switching {
        info.block_type = reader.get_bits(2)? as u8;
        info.mixed_block = reader.get_bit()?;
        for table in info.table_select.iter_mut().take(2) {
            *table = reader.get_bits(5)? as u8;
        }
        for gain in info.subblock_gain.iter_mut() {
            *gain = reader.get_bits(3)? as u8;
        }
        // Implicit region boundaries for switched windows
        info.region0_count = if info.block_type == 2 && !info.mixed_block { 8 } else { 7 };
        info.region1_count = 36;
    } else {
        for table in info.table_select.iter_mut() {
            *table = reader.get_bits(5)? as u8;
        }
        info.region0_count = reader.get_bits(4)? as u8;
        info.region1_count = reader.get_bits(3)? as u8;
    }

    if !lsf {
        info.preflag = reader.get_bit()?;
    }
    info.scalefac_scale = reader.get_bit()?;
    info.count1_table = reader.get_bit()?;

    Ok(info)
}

fn validate_granule(info: &GranuleInfo, gr: usize, ch: usize) -> Result<()> {
    if info.big_values > MAX_BIG_VALUES {
        return Err(Error::Decode(format!(
            "big_values {} exceeds {} (granule {}, channel {})",
            info.big_values, MAX_BIG_VALUES, gr, ch
        )));
    }
    if info.window_switching && info.block_type == 0 {
        return Err(Error::Decode(format!(
            "window switching with normal block type (granule {}, channel {})",
            gr, ch
        )));
    }
    Ok(())
}

pub struct Layer3Decoder {
    spectral: Option<MpaDecoder>,
    /// Main data bytes from earlier frames the next frame may reference
    reservoir: usize,
    timestamp: u64,
}

impl Layer3Decoder {
    pub fn new() -> Self {
        Self {
            spectral: None,
            reservoir: 0,
            timestamp: 0,
        }
    }

    fn spectral_decoder(&mut self, header: &FrameHeader) -> Result<&mut MpaDecoder> {
        if self.spectral.is_none() {
            let channels = if header.channels() == 1 {
                Channels::FRONT_CENTRE
            } else {
                Channels::FRONT_LEFT | Channels::FRONT_RIGHT
            };
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate())
                .with_channels(channels);

            let decoder = MpaDecoder::try_new(&params, &DecoderOptions::default())
                .map_err(|e| Error::Decode(format!("Failed to create Layer III decoder: {}", e)))?;
            self.spectral = Some(decoder);
        }

        self.spectral
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Layer III decoder missing".to_string()))
    }
}

impl Default for Layer3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerDecoder for Layer3Decoder {
    fn decode_frame(
        &mut self,
        frame: &Frame<'_>,
        _filters: &mut [SynthesisFilter],
        sink: &mut PcmSink,
    ) -> Result<CrcStatus> {
        let header = frame.header;
        let body = frame.body();
        let crc_len = if header.has_crc { 2 } else { 0 };
        let side_len = header.side_info_size();

        let side_bytes = body
            .get(crc_len..crc_len + side_len)
            .ok_or_else(|| Error::Decode("frame too short for side information".to_string()))?;

        let crc_status = if header.has_crc {
            let mut crc = Crc16::new();
            crc.add_bits(header.word & 0xFFFF, 16);
            for byte in side_bytes {
                crc.add_bits(*byte as u32, 8);
            }
            let stored = u16::from_be_bytes([body[0], body[1]]);
            finish_crc(Some(crc), Some(stored))
        } else {
            CrcStatus::Absent
        };

        let side = SideInfo::parse(&header, side_bytes);

        // Every frame's main data enters the reservoir, decodable or not, so
        // later frames referencing it stay aligned.
        let reservoir_before = self.reservoir;
        let reservoir_cap = if header.version.is_lsf() { 255 } else { 511 };
        self.reservoir = (self.reservoir + header.slot_count).min(reservoir_cap);

        let samples = header.samples_per_frame() as u64;
        let packet = Packet::new_from_slice(0, self.timestamp, samples, frame.data);
        self.timestamp += samples;

        let decoder = self.spectral_decoder(&header)?;
        let decoded = decoder.decode(&packet);

        let side = side?;
        let available = side.main_data_begin + header.slot_count;
        if side.main_data_bits() > available * 8 {
            return Err(Error::Decode(format!(
                "main data claims {} bits, frame provides {}",
                side.main_data_bits(),
                available * 8
            )));
        }

        if side.main_data_begin > reservoir_before {
            // Frame refers to main data that precedes the stream start
            debug!(
                "Bit reservoir underflow at offset {} (needs {} bytes)",
                frame.offset, side.main_data_begin
            );
            sink.push_silence(header.samples_per_frame() * header.channels() as usize);
            return Ok(crc_status);
        }

        let decoded = decoded.map_err(|e| Error::Decode(format!("Layer III frame: {}", e)))?;
        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        sink.extend_interleaved(buffer.samples());

        Ok(crc_status)
    }
}
