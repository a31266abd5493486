//! PCM sink: interleaved 16-bit output of the layer decoders

use crate::audio::types::{AudioFormat, DecodedClip};
use crate::codec::synthesis::SUBBANDS;

/// Convert a nominal `[-1, 1]` sample to i16 with saturation.
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    let scaled = (sample * 32767.0).round();
    if scaled >= i16::MAX as f32 {
        i16::MAX
    } else if scaled <= i16::MIN as f32 {
        i16::MIN
    } else {
        scaled as i16
    }
}

/// Accumulates interleaved samples for one stream.
#[derive(Debug, Default)]
pub struct PcmSink {
    samples: Vec<i16>,
}

impl PcmSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append 32 synthesized samples per channel, interleaving when a right
    /// channel is given.
    pub fn push_block(&mut self, left: &[f32; SUBBANDS], right: Option<&[f32; SUBBANDS]>) {
        match right {
            Some(right) => {
                self.samples.reserve(SUBBANDS * 2);
                for (l, r) in left.iter().zip(right.iter()) {
                    self.samples.push(to_i16(*l));
                    self.samples.push(to_i16(*r));
                }
            }
            None => self.samples.extend(left.iter().map(|s| to_i16(*s))),
        }
    }

    /// Append samples that are already interleaved
    pub fn extend_interleaved(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// Append `count` samples of silence
    pub fn push_silence(&mut self, count: usize) {
        self.samples.resize(self.samples.len() + count, 0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop anything written after `len`; undoes a partially decoded frame.
    pub fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    /// Hand out everything collected so far
    pub fn take(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }

    pub fn into_clip(self, format: AudioFormat) -> DecodedClip {
        DecodedClip::new(self.samples, format)
    }
}
