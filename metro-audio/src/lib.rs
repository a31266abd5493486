//! # Metro Audio
//!
//! MPEG audio decoding and real-time playback for the metro simulation.
//!
//! **Decoding:** Layer I, II and III frame streams are synchronised, parsed
//! and decoded to 16-bit PCM (`codec`). WAV resources are read with hound.
//!
//! **Playback:** decoded clips and streamed music play as voices on a single
//! mixer thread that owns the output line (`playback`). `SoundEngine` is the
//! façade application code uses.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;

pub use audio::{AudioFormat, CaptureLine, CpalLine, DecodedClip, OutputLine, LINE_FORMAT};
pub use config::AudioConfig;
pub use error::{Error, Result};
pub use playback::{MixerEvent, SoundEngine, StopReason, VoiceCategory, VoiceHandle, VoiceState};
