//! Layer I decoding
//!
//! 384 samples per channel: 12 blocks of one sample in each of 32 subbands.

use crate::codec::bitstream::{read_checked, BitReader, Crc16};
use crate::codec::decoder::{finish_crc, requantize, scalefactor, CrcStatus, LayerDecoder};
use crate::codec::pcm::PcmSink;
use crate::codec::sync::Frame;
use crate::codec::synthesis::{SynthesisFilter, SUBBANDS};
use crate::error::{Error, Result};

const BLOCKS: usize = 12;

#[derive(Debug, Default)]
pub struct Layer1Decoder;

impl Layer1Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl LayerDecoder for Layer1Decoder {
    fn decode_frame(
        &mut self,
        frame: &Frame<'_>,
        filters: &mut [SynthesisFilter],
        sink: &mut PcmSink,
    ) -> Result<CrcStatus> {
        let header = &frame.header;
        let channels = header.channels() as usize;
        let bound = header.stereo_bound().min(SUBBANDS);

        let mut reader = BitReader::new(frame.body());
        let mut crc = header.has_crc.then(|| {
            let mut crc = Crc16::new();
            crc.add_bits(header.word & 0xFFFF, 16);
            crc
        });
        let stored_crc = if header.has_crc {
            Some(reader.get_bits(16)? as u16)
        } else {
            None
        };

        // Allocation: 4 bits per subband, shared above the joint stereo bound
        let mut allocation = [[0u8; SUBBANDS]; 2];
        for sb in 0..SUBBANDS {
            let shared = sb >= bound;
            for ch in 0..channels {
                if shared && ch > 0 {
                    allocation[ch][sb] = allocation[0][sb];
                    continue;
                }
                let value = read_checked(&mut reader, &mut crc, 4)? as u8;
                if value == 15 {
                    return Err(Error::Decode(format!("forbidden Layer I allocation in subband {}", sb)));
                }
                allocation[ch][sb] = value;
            }
        }
        let crc_status = finish_crc(crc, stored_crc);

        let mut scale = [[0.0f32; SUBBANDS]; 2];
        for sb in 0..SUBBANDS {
            for ch in 0..channels {
                if allocation[ch][sb] != 0 {
                    scale[ch][sb] = scalefactor(reader.get_bits(6)?)?;
                }
            }
        }

        let mut subband = [[0.0f32; SUBBANDS]; 2];
        let mut pcm = [[0.0f32; SUBBANDS]; 2];
        for _ in 0..BLOCKS {
            for sb in 0..SUBBANDS {
                if sb < bound {
                    for ch in 0..channels {
                        subband[ch][sb] = read_sample(&mut reader, allocation[ch][sb])? * scale[ch][sb];
                    }
                } else {
                    let fraction = read_sample(&mut reader, allocation[0][sb])?;
                    for ch in 0..channels {
                        subband[ch][sb] = fraction * scale[ch][sb];
                    }
                }
            }

            for ch in 0..channels {
                filters[ch].synthesize(&subband[ch], &mut pcm[ch]);
            }
            if channels == 2 {
                sink.push_block(&pcm[0], Some(&pcm[1]));
            } else {
                sink.push_block(&pcm[0], None);
            }
        }

        Ok(crc_status)
    }
}

/// One sample of `allocation + 1` bits, dequantised to a fraction.
fn read_sample(reader: &mut BitReader<'_>, allocation: u8) -> Result<f32> {
    if allocation == 0 {
        return Ok(0.0);
    }
    let bits = allocation as u32 + 1;
    let levels = (1u32 << bits) - 1;
    let code = reader.get_bits(bits)?;
    Ok(requantize(code, levels))
}
