//! Deterministic WAV test data
//!
//! Sine waves and silence at known rates and lengths, written to disk or
//! kept in memory for `load_sound_bytes`.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;
use std::path::Path;

fn spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn sine_sample(frame: u64, sample_rate: u32, frequency_hz: f32, amplitude: f32) -> i16 {
    let t = frame as f32 / sample_rate as f32;
    ((2.0 * PI * frequency_hz * t).sin() * amplitude * 32767.0) as i16
}

/// Write a 16-bit sine wave WAV file.
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate, channels))?;
    let frames = sample_rate as u64 * duration_ms / 1000;
    for frame in 0..frames {
        let sample = sine_sample(frame, sample_rate, frequency_hz, amplitude);
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()
}

/// In-memory sine wave WAV.
pub fn sine_wav_bytes(sample_rate: u32, channels: u16, duration_ms: u64, frequency_hz: f32, amplitude: f32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec(sample_rate, channels)).unwrap();
        let frames = sample_rate as u64 * duration_ms / 1000;
        for frame in 0..frames {
            let sample = sine_sample(frame, sample_rate, frequency_hz, amplitude);
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// In-memory silent WAV of exactly `frames` frames.
pub fn silent_wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec(sample_rate, channels)).unwrap();
        for _ in 0..frames * channels as usize {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
