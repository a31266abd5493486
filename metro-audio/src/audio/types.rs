//! Core audio data types
//!
//! Defines the PCM format tag and the decoded clip buffer shared by voices.

use std::sync::Arc;
use std::time::Duration;

/// PCM format tag carried by every sample buffer.
///
/// Samples are always signed 16-bit; only rate and channel count vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Interleaved channel count (1 or 2)
    pub channels: u16,
}

impl AudioFormat {
    /// Bits per sample for every buffer in the pipeline
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes occupied by one interleaved frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (Self::BITS_PER_SAMPLE as usize / 8)
    }

    /// Wall-clock duration of `frames` frames
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {}",
            self.sample_rate,
            Self::BITS_PER_SAMPLE,
            if self.channels == 1 { "mono" } else { "stereo" }
        )
    }
}

/// Format of the hardware line and of everything the mixer touches
pub const LINE_FORMAT: AudioFormat = AudioFormat::new(44100, 2);

/// Fully decoded, memory-resident PCM.
///
/// The sample buffer is immutable after construction and shared by `Arc`, so
/// any number of voices can read the same clip concurrently.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    samples: Arc<[i16]>,
    format: AudioFormat,
}

impl DecodedClip {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<i16>, format: AudioFormat) -> Self {
        let channels = format.channels.max(1) as usize;
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);

        Self {
            samples: Arc::from(samples),
            format,
        }
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of interleaved samples (frames × channels)
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of frames
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frame_count())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
