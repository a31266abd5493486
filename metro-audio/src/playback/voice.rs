//! Playback voices
//!
//! A `PlaybackVoice` is one playing instance of a sound. Once submitted it is
//! owned by the mixer thread, which alone moves its read cursor. Callers keep
//! a `VoiceHandle` onto the voice's `VoiceControl`: volume, transport state
//! and looping are independent atomics the mixer picks up on its next cycle.

use crate::audio::atomic::{clamp_unit, AtomicF32};
use crate::audio::resampler::convert_clip;
use crate::audio::types::{DecodedClip, LINE_FORMAT};
use crate::codec::wav::decode_wav;
use crate::codec::SourceKind;
use crate::config::CodecConfig;
use crate::error::Result;
use crate::playback::stream::StreamSource;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Unique voice identifier
pub type VoiceId = u64;

static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Transport state of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl VoiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => VoiceState::Playing,
            2 => VoiceState::Paused,
            _ => VoiceState::Stopped,
        }
    }
}

/// Mixer gain group a voice belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceCategory {
    Sfx,
    Music,
}

/// Why a voice left the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Source played to its end
    Finished,
    /// Stopped through its handle, or replaced
    Stopped,
    /// Streaming decode failed
    Failed,
    /// The line rejected a block this voice contributed to
    LineError,
    /// Mixer shut down with the voice still active
    Shutdown,
}

/// State shared between a voice and its handles.
#[derive(Debug)]
pub struct VoiceControl {
    id: VoiceId,
    category: VoiceCategory,
    volume: AtomicF32,
    state: AtomicU8,
    looping: AtomicBool,
    /// Frames delivered so far
    position: AtomicU64,
}

impl VoiceControl {
    fn new(category: VoiceCategory, volume: f32, looping: bool) -> Self {
        Self {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed),
            category,
            volume: AtomicF32::new(clamp_unit(volume)),
            state: AtomicU8::new(VoiceState::Playing as u8),
            looping: AtomicBool::new(looping),
            position: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub(crate) fn state(&self) -> VoiceState {
        VoiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: VoiceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub(crate) fn volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        self.volume.store(clamp_unit(volume), Ordering::Relaxed);
    }
}

/// Caller-side control of a submitted voice. Cheap to clone.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    control: Arc<VoiceControl>,
}

impl VoiceHandle {
    pub fn id(&self) -> VoiceId {
        self.control.id
    }

    pub(crate) fn control(&self) -> &Arc<VoiceControl> {
        &self.control
    }

    pub fn category(&self) -> VoiceCategory {
        self.control.category
    }

    pub fn state(&self) -> VoiceState {
        self.control.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == VoiceState::Playing
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == VoiceState::Stopped
    }

    pub fn volume(&self) -> f32 {
        self.control.volume()
    }

    /// Set the volume. Values are clamped to `[0, 1]`; NaN is silence.
    pub fn set_volume(&self, volume: f32) {
        self.control.set_volume(volume);
    }

    pub fn is_looping(&self) -> bool {
        self.control.is_looping()
    }

    pub fn set_looping(&self, looping: bool) {
        self.control.looping.store(looping, Ordering::Relaxed);
    }

    /// Pause a playing voice. No effect in any other state.
    pub fn pause(&self) {
        let _ = self.control.state.compare_exchange(
            VoiceState::Playing as u8,
            VoiceState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Resume a paused voice. A stopped voice stays stopped.
    pub fn resume(&self) {
        let _ = self.control.state.compare_exchange(
            VoiceState::Paused as u8,
            VoiceState::Playing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stop the voice; the mixer retires it on its next cycle.
    pub fn stop(&self) {
        self.control.set_state(VoiceState::Stopped);
    }

    /// Frames the voice has delivered to the mixer
    pub fn position_frames(&self) -> u64 {
        self.control.position.load(Ordering::Relaxed)
    }
}

/// Where a voice's samples come from
pub enum VoiceSource {
    /// Shared, fully decoded clip in the line format
    Clip(Arc<DecodedClip>),
    /// Live decode of a compressed resource
    Stream(StreamSource),
}

/// One playing instance of a sound.
pub struct PlaybackVoice {
    control: Arc<VoiceControl>,
    source: VoiceSource,
    /// Next sample index into a clip source
    position: usize,
    channels: usize,
    end_reason: Option<StopReason>,
}

impl PlaybackVoice {
    /// Voice over a decoded clip, starting in the playing state.
    pub fn from_clip(clip: Arc<DecodedClip>, category: VoiceCategory, volume: f32, looping: bool) -> Self {
        Self {
            control: Arc::new(VoiceControl::new(category, volume, looping)),
            channels: clip.format().channels.max(1) as usize,
            source: VoiceSource::Clip(clip),
            position: 0,
            end_reason: None,
        }
    }

    /// Voice decoding `data` on a worker thread as it plays.
    ///
    /// MPEG data is checked for a first frame before the worker starts, so a
    /// resource that is not audio fails here rather than as a silent voice.
    /// WAV data is uncompressed already and becomes a clip voice.
    pub fn from_stream(
        data: Arc<[u8]>,
        codec: &CodecConfig,
        category: VoiceCategory,
        volume: f32,
        looping: bool,
    ) -> Result<Self> {
        if SourceKind::detect(&data) == SourceKind::Wav {
            let clip = convert_clip(&decode_wav(&data)?, LINE_FORMAT)?;
            return Ok(Self::from_clip(Arc::new(clip), category, volume, looping));
        }

        let control = Arc::new(VoiceControl::new(category, volume, looping));
        let stream = StreamSource::spawn(data, codec, Arc::clone(&control))?;
        Ok(Self {
            control,
            source: VoiceSource::Stream(stream),
            position: 0,
            channels: LINE_FORMAT.channels as usize,
            end_reason: None,
        })
    }

    pub fn handle(&self) -> VoiceHandle {
        VoiceHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub(crate) fn control(&self) -> &Arc<VoiceControl> {
        &self.control
    }

    pub fn id(&self) -> VoiceId {
        self.control.id
    }

    pub fn category(&self) -> VoiceCategory {
        self.control.category
    }

    pub fn state(&self) -> VoiceState {
        self.control.state()
    }

    /// Why the voice stopped itself, if it did
    pub fn end_reason(&self) -> Option<StopReason> {
        self.end_reason
    }

    /// Fill `out` with scaled samples from the current position.
    ///
    /// Returns 0 unless playing. A non-looping voice that runs out of data
    /// stops and returns fewer samples than requested; a looping one wraps.
    /// A streaming voice waiting on its decoder returns 0 and keeps playing.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        if self.control.state() != VoiceState::Playing {
            return 0;
        }

        let gain = q15_gain(self.control.volume());
        let looping = self.control.is_looping();

        let written = match &mut self.source {
            VoiceSource::Clip(clip) => {
                let samples = clip.samples();
                let (written, position, exhausted) = copy_clip(samples, self.position, looping, out);
                self.position = position;
                if exhausted {
                    self.finish(StopReason::Finished);
                }
                written
            }
            VoiceSource::Stream(stream) => {
                let read = stream.read(out);
                if let Some(reason) = read.ended {
                    self.finish(reason);
                }
                read.samples
            }
        };

        for sample in out[..written].iter_mut() {
            *sample = scale_q15(*sample, gain);
        }

        self.control
            .position
            .fetch_add((written / self.channels) as u64, Ordering::Relaxed);
        written
    }

    pub(crate) fn finish(&mut self, reason: StopReason) {
        self.end_reason = Some(reason);
        self.control.set_state(VoiceState::Stopped);
    }
}

/// Copy from `samples` at `position`, wrapping when looping.
///
/// Returns samples written, the new position, and whether a non-looping
/// source ran out.
fn copy_clip(samples: &[i16], mut position: usize, looping: bool, out: &mut [i16]) -> (usize, usize, bool) {
    if samples.is_empty() {
        return (0, 0, true);
    }

    let mut written = 0;
    while written < out.len() {
        if position >= samples.len() {
            if looping {
                position = 0;
            } else {
                break;
            }
        }
        let n = (out.len() - written).min(samples.len() - position);
        out[written..written + n].copy_from_slice(&samples[position..position + n]);
        written += n;
        position += n;
    }

    let exhausted = !looping && position >= samples.len();
    (written, position, exhausted)
}

/// Volume as Q15 fixed point; 1.0 maps to 32768.
#[inline]
pub fn q15_gain(volume: f32) -> i32 {
    (clamp_unit(volume) * 32768.0).round() as i32
}

#[inline]
pub fn scale_q15(sample: i16, gain: i32) -> i16 {
    ((sample as i32 * gain) >> 15).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
