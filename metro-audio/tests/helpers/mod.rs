//! Test helper modules for metro-audio integration tests
//!
//! - audio_generator: WAV files and in-memory WAV bytes with hound
//! - frame_builder: synthetic MPEG audio frames built bit by bit
#![allow(dead_code)]

pub mod audio_generator;
pub mod frame_builder;

pub use audio_generator::{generate_sine_wav, sine_wav_bytes, silent_wav_bytes};
pub use frame_builder::{
    layer1_frame_with_scalefactor, layer1_silent_frame, layer1_tone_frame, layer2_silent_frame, layer2_tone_frame,
    layer3_silent_frame, stream_of, xing_frame, BitWriter, FrameSpec,
};

use metro_audio::MixerEvent;
use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};

/// Wait until `pred` accepts an event, or fail after `timeout`.
pub fn wait_for_event<F>(events: &Receiver<MixerEvent>, timeout: Duration, mut pred: F) -> MixerEvent
where
    F: FnMut(&MixerEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let left = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("No matching mixer event within {:?}", timeout));
        match events.recv_timeout(left) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("No matching mixer event within {:?}: {}", timeout, e),
        }
    }
}
