//! RIFF/WAVE input via hound

use crate::audio::types::{AudioFormat, DecodedClip};
use crate::error::{Error, Result};
use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use tracing::debug;

/// True when the bytes start with a RIFF/WAVE header.
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Decode a complete WAV file to 16-bit PCM.
///
/// Integer samples of any width are rescaled to 16 bits; float samples are
/// clamped to `[-1, 1]`. Files with more than two channels are rejected.
pub fn decode_wav(data: &[u8]) -> Result<DecodedClip> {
    let mut reader = WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        return Err(Error::Decode(format!(
            "{} channel WAV is not supported",
            spec.channels
        )));
    }

    let samples: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => {
            let shift = spec.bits_per_sample as i32 - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| rescale_int(v, shift)))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0).round() as i16))
            .collect::<std::result::Result<_, _>>()?,
    };

    let format = AudioFormat::new(spec.sample_rate, spec.channels);
    debug!(
        "Decoded WAV: {} samples, {}-bit {:?} as {}",
        samples.len(),
        spec.bits_per_sample,
        spec.sample_format,
        format
    );

    Ok(DecodedClip::new(samples, format))
}

fn rescale_int(value: i32, shift: i32) -> i16 {
    let scaled = if shift >= 0 {
        value >> shift
    } else {
        value << -shift
    };
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
