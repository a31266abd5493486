//! Layer II decoding
//!
//! 1152 samples per channel: 12 granules of 3 samples in up to 30 subbands.
//! Allocation field widths and quantiser choices come from per-subband
//! tables selected by bitrate, sample rate and MPEG version.

use crate::codec::bitstream::{read_checked, BitReader, Crc16};
use crate::codec::decoder::{finish_crc, requantize, scalefactor, CrcStatus, LayerDecoder};
use crate::codec::header::FrameHeader;
use crate::codec::pcm::PcmSink;
use crate::codec::sync::Frame;
use crate::codec::synthesis::{SynthesisFilter, SUBBANDS};
use crate::error::{Error, Result};

const GRANULES: usize = 12;

/// Quantiser class: number of levels, and whether three samples share one
/// grouped codeword.
#[derive(Debug, Clone, Copy)]
struct QuantClass {
    levels: u32,
    grouped: bool,
    bits: u32,
}

const CLASSES: [QuantClass; 17] = [
    QuantClass { levels: 3, grouped: true, bits: 5 },
    QuantClass { levels: 5, grouped: true, bits: 7 },
    QuantClass { levels: 7, grouped: false, bits: 3 },
    QuantClass { levels: 9, grouped: true, bits: 10 },
    QuantClass { levels: 15, grouped: false, bits: 4 },
    QuantClass { levels: 31, grouped: false, bits: 5 },
    QuantClass { levels: 63, grouped: false, bits: 6 },
    QuantClass { levels: 127, grouped: false, bits: 7 },
    QuantClass { levels: 255, grouped: false, bits: 8 },
    QuantClass { levels: 511, grouped: false, bits: 9 },
    QuantClass { levels: 1023, grouped: false, bits: 10 },
    QuantClass { levels: 2047, grouped: false, bits: 11 },
    QuantClass { levels: 4095, grouped: false, bits: 12 },
    QuantClass { levels: 8191, grouped: false, bits: 13 },
    QuantClass { levels: 16383, grouped: false, bits: 14 },
    QuantClass { levels: 32767, grouped: false, bits: 15 },
    QuantClass { levels: 65535, grouped: false, bits: 16 },
];

/// Allocation field width and the class chosen by each nonzero value.
struct AllocRow {
    nbal: u32,
    classes: &'static [u8],
}

const A4_FULL: AllocRow = AllocRow {
    nbal: 4,
    classes: &[0, 2, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
};
const A4_MID: AllocRow = AllocRow {
    nbal: 4,
    classes: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 16],
};
const A3_LOW: AllocRow = AllocRow {
    nbal: 3,
    classes: &[0, 1, 2, 3, 4, 5, 16],
};
const A2_LOW: AllocRow = AllocRow {
    nbal: 2,
    classes: &[0, 1, 16],
};
const C4: AllocRow = AllocRow {
    nbal: 4,
    classes: &[0, 1, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
};
const C3: AllocRow = AllocRow {
    nbal: 3,
    classes: &[0, 1, 3, 4, 5, 6, 7],
};
const LSF4: AllocRow = AllocRow {
    nbal: 4,
    classes: &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14],
};
const LSF2: AllocRow = AllocRow {
    nbal: 2,
    classes: &[0, 1, 3],
};

/// Allocation row for subband `sb` of a frame coding `subbands` bands.
fn alloc_row(header: &FrameHeader, sb: usize) -> &'static AllocRow {
    if header.version.is_lsf() {
        return match sb {
            0..=3 => &LSF4,
            4..=10 => &C3,
            _ => &LSF2,
        };
    }
    match header.subbands {
        8 | 12 => match sb {
            0..=1 => &C4,
            _ => &C3,
        },
        _ => match sb {
            0..=2 => &A4_FULL,
            3..=10 => &A4_MID,
            11..=22 => &A3_LOW,
            _ => &A2_LOW,
        },
    }
}

#[derive(Debug, Default)]
pub struct Layer2Decoder;

impl Layer2Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl LayerDecoder for Layer2Decoder {
    fn decode_frame(
        &mut self,
        frame: &Frame<'_>,
        filters: &mut [SynthesisFilter],
        sink: &mut PcmSink,
    ) -> Result<CrcStatus> {
        let header = &frame.header;
        let channels = header.channels() as usize;
        let sblimit = header.subbands.min(SUBBANDS);
        let bound = header.stereo_bound().min(sblimit);

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

        let mut class: [[Option<QuantClass>; SUBBANDS]; 2] = [[None; SUBBANDS]; 2];
        for sb in 0..sblimit {
            let row = alloc_row(header, sb);
            let shared = sb >= bound;
            for ch in 0..channels {
                if shared && ch > 0 {
                    class[ch][sb] = class[0][sb];
                    continue;
                }
                let value = read_checked(&mut reader, &mut crc, row.nbal)? as usize;
                class[ch][sb] = match value {
                    0 => None,
                    v => {
                        let index = row.classes.get(v - 1).ok_or_else(|| {
                            Error::Decode(format!("allocation {} out of range in subband {}", v, sb))
                        })?;
                        Some(CLASSES[*index as usize])
                    }
                };
            }
        }

        let mut scfsi = [[0u8; SUBBANDS]; 2];
        for sb in 0..sblimit {
            for ch in 0..channels {
                if class[ch][sb].is_some() {
                    scfsi[ch][sb] = read_checked(&mut reader, &mut crc, 2)? as u8;
                }
            }
        }
        let crc_status = finish_crc(crc, stored_crc);

        let mut scale = [[[0.0f32; 3]; SUBBANDS]; 2];
        for sb in 0..sblimit {
            for ch in 0..channels {
                if class[ch][sb].is_none() {
                    continue;
                }
                scale[ch][sb] = match scfsi[ch][sb] {
                    0 => {
                        let a = scalefactor(reader.get_bits(6)?)?;
                        let b = scalefactor(reader.get_bits(6)?)?;
                        let c = scalefactor(reader.get_bits(6)?)?;
                        [a, b, c]
                    }
                    1 => {
                        let a = scalefactor(reader.get_bits(6)?)?;
                        let b = scalefactor(reader.get_bits(6)?)?;
                        [a, a, b]
                    }
                    2 => {
                        let a = scalefactor(reader.get_bits(6)?)?;
                        [a, a, a]
                    }
                    _ => {
                        let a = scalefactor(reader.get_bits(6)?)?;
                        let b = scalefactor(reader.get_bits(6)?)?;
                        [a, b, b]
                    }
                };
            }
        }

        let mut fractions = [[[0.0f32; SUBBANDS]; 3]; 2];
        let mut pcm = [[0.0f32; SUBBANDS]; 2];
        for granule in 0..GRANULES {
            let part = granule / 4;

            for sb in 0..sblimit {
                if sb < bound {
                    for ch in 0..channels {
                        let triple = read_triple(&mut reader, class[ch][sb])?;
                        for (s, value) in triple.iter().enumerate() {
                            fractions[ch][s][sb] = value * scale[ch][sb][part];
                        }
                    }
                } else {
                    let triple = read_triple(&mut reader, class[0][sb])?;
                    for ch in 0..channels {
                        for (s, value) in triple.iter().enumerate() {
                            fractions[ch][s][sb] = value * scale[ch][sb][part];
                        }
                    }
                }
            }

            for s in 0..3 {
                for ch in 0..channels {
                    filters[ch].synthesize(&fractions[ch][s], &mut pcm[ch]);
                }
                if channels == 2 {
                    sink.push_block(&pcm[0], Some(&pcm[1]));
                } else {
                    sink.push_block(&pcm[0], None);
                }
            }
        }

        Ok(crc_status)
    }
}

/// Three consecutive samples of one subband, dequantised to fractions.
fn read_triple(reader: &mut BitReader<'_>, class: Option<QuantClass>) -> Result<[f32; 3]> {
    let Some(class) = class else {
        return Ok([0.0; 3]);
    };

    if class.grouped {
        let mut code = reader.get_bits(class.bits)?;
        let n = class.levels;
        if code >= n * n * n {
            return Err(Error::Decode(format!("grouped code {} exceeds {} levels", code, n)));
        }
        let mut out = [0.0f32; 3];
        for value in out.iter_mut() {
            *value = requantize(code % n, n);
            code /= n;
        }
        Ok(out)
    } else {
        let mut out = [0.0f32; 3];
        for value in out.iter_mut() {
            *value = requantize(reader.get_bits(class.bits)?, class.levels);
        }
        Ok(out)
    }
}
