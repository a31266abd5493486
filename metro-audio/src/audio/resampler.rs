//! Format conversion to the line format using rubato
//!
//! Everything the mixer reads is 44.1 kHz stereo. Decoded clips are converted
//! once, at load time; streamed music goes through a `StreamConverter` that
//! keeps resampler state between decoded frames.

use crate::audio::types::{AudioFormat, DecodedClip};
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Frames fed to a streaming resampler per call
const STREAM_CHUNK_FRAMES: usize = 1152;

/// Convert a whole clip to `target` (channel remix, then resampling).
pub fn convert_clip(clip: &DecodedClip, target: AudioFormat) -> Result<DecodedClip> {
    let source = clip.format();
    if source == target {
        return Ok(clip.clone());
    }

    debug!("Converting clip from {} to {}", source, target);

    let planar = remix(clip.samples(), source.channels, target.channels);
    if source.sample_rate == target.sample_rate || clip.is_empty() {
        return Ok(DecodedClip::new(interleave(&planar), target));
    }

    let frames = planar[0].len();
    let mut resampler = create_resampler(source.sample_rate, target.sample_rate, target.channels, frames)?;
    let output = resampler
        .process(&planar, None)
        .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

    debug!(
        "Resampled {} input frames to {} output frames",
        frames,
        output.first().map(|c| c.len()).unwrap_or(0)
    );

    Ok(DecodedClip::new(interleave(&output), target))
}

/// Incremental converter for decoded stream chunks.
pub struct StreamConverter {
    source: AudioFormat,
    target: AudioFormat,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<Vec<f32>>,
}

impl StreamConverter {
    pub fn new(source: AudioFormat, target: AudioFormat) -> Result<Self> {
        let resampler = if source.sample_rate != target.sample_rate {
            Some(create_resampler(
                source.sample_rate,
                target.sample_rate,
                target.channels,
                STREAM_CHUNK_FRAMES,
            )?)
        } else {
            None
        };

        Ok(Self {
            source,
            target,
            resampler,
            pending: vec![Vec::new(); target.channels as usize],
        })
    }

    /// Convert the next chunk of interleaved source samples.
    ///
    /// Output may lag input by up to one resampler chunk.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        let planar = remix(samples, self.source.channels, self.target.channels);
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(interleave(&planar));
        };

        for (pending, channel) in self.pending.iter_mut().zip(planar) {
            pending.extend(channel);
        }

        let mut out = Vec::new();
        while self.pending[0].len() >= STREAM_CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..STREAM_CHUNK_FRAMES).collect())
                .collect();
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Resample(format!("Stream resampling failed: {}", e)))?;
            out.extend(interleave(&resampled));
        }
        Ok(out)
    }

    /// Convert whatever is still buffered at end of stream.
    pub fn flush(&mut self) -> Result<Vec<i16>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let resampled = resampler
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| Error::Resample(format!("Stream resampling failed: {}", e)))?;
        Ok(interleave(&resampled))
    }
}

fn create_resampler(input_rate: u32, output_rate: u32, channels: u16, chunk_size: usize) -> Result<FastFixedIn<f32>> {
    FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        chunk_size.max(1),
        channels as usize,
    )
    .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))
}

/// Deinterleave to planar f32, duplicating mono or averaging stereo as needed.
fn remix(samples: &[i16], from: u16, to: u16) -> Vec<Vec<f32>> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    let frames = samples.len() / from;
    let mut planar = vec![Vec::with_capacity(frames); to];

    for frame in samples.chunks_exact(from) {
        if from == to {
            for (ch, s) in frame.iter().enumerate() {
                planar[ch].push(*s as f32 / 32768.0);
            }
        } else if from == 1 {
            let s = frame[0] as f32 / 32768.0;
            for channel in planar.iter_mut() {
                channel.push(s);
            }
        } else {
            let mixed = frame.iter().map(|s| *s as f32).sum::<f32>() / from as f32 / 32768.0;
            for channel in planar.iter_mut() {
                channel.push(mixed);
            }
        }
    }

    planar
}

/// Interleave planar f32 back to saturated i16.
fn interleave(planar: &[Vec<f32>]) -> Vec<i16> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut out = Vec::with_capacity(frames * planar.len());

    for i in 0..frames {
        for channel in planar {
            let s = (channel[i] * 32768.0).round();
            out.push(s.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
    }
    out
}
