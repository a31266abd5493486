//! Voices, the mixer thread and the sound engine façade

pub mod engine;
pub mod events;
pub mod mixer;
pub mod queue;
pub mod stream;
pub mod voice;

pub use engine::{FsLoader, ResourceLoader, SoundEngine};
pub use events::MixerEvent;
pub use mixer::{MixCommand, Mixer, MixerGains};
pub use queue::MusicQueue;
pub use voice::{PlaybackVoice, StopReason, VoiceCategory, VoiceHandle, VoiceId, VoiceState};
