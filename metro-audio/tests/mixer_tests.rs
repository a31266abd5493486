//! Mixer thread lifecycle and output tests against capture lines

mod helpers;

use helpers::*;
use metro_audio::audio::resampler::convert_clip;
use metro_audio::codec::decode_clip;
use metro_audio::config::{CodecConfig, MixerConfig};
use metro_audio::playback::{Mixer, MixerEvent, PlaybackVoice, StopReason, VoiceCategory};
use metro_audio::{CaptureLine, LINE_FORMAT};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(block_frames: usize) -> MixerConfig {
    MixerConfig {
        block_frames,
        write_interval_ms: 0,
        idle_wait_ms: 10,
        shutdown_timeout_ms: 500,
    }
}

fn tone_voice(duration_ms: u64, looping: bool) -> PlaybackVoice {
    voice_from_wav(&sine_wav_bytes(44100, 2, duration_ms, 440.0, 0.5), looping)
}

fn voice_from_wav(data: &[u8], looping: bool) -> PlaybackVoice {
    let clip = decode_clip(data, &CodecConfig::default()).unwrap();
    let clip = convert_clip(&clip, LINE_FORMAT).unwrap();
    PlaybackVoice::from_clip(Arc::new(clip), VoiceCategory::Sfx, 1.0, looping)
}

#[test]
fn test_two_second_tone_sample_count() {
    let line = CaptureLine::new();
    let probe = line.probe();
    let mixer = Mixer::new(Box::new(line), config(1024), Duration::from_millis(20), Arc::default());
    let events = mixer.subscribe();
    mixer.start().unwrap();

    // Mono source, upmixed to the stereo line format on load
    let handle = mixer.submit(voice_from_wav(&sine_wav_bytes(44100, 1, 2000, 440.0, 0.5), false));
    wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, MixerEvent::VoiceStopped { id, .. } if *id == handle.id())
    });
    mixer.stop();

    let frames = probe.frames_written() as i64;
    assert!((frames - 88200).abs() <= 1024, "wrote {} frames", frames);

    let samples = probe.samples();
    assert!(samples.chunks_exact(2).all(|f| f[0] == f[1]), "mono should play on both channels");
    assert!(samples.iter().any(|s| s.unsigned_abs() > 10000));
}

#[test]
fn test_stop_returns_within_timeout() {
    let line = CaptureLine::paced();
    let probe = line.probe();
    let mixer = Mixer::new(Box::new(line), config(512), Duration::from_millis(20), Arc::default());
    mixer.start().unwrap();

    // Looping stream voice, decoded on its own worker thread
    let data = stream_of(&layer1_tone_frame(&FrameSpec::new(1, 4, true), false), 40);
    let voice = PlaybackVoice::from_stream(Arc::from(data), &CodecConfig::default(), VoiceCategory::Music, 1.0, true)
        .unwrap();
    let handle = mixer.submit(voice);
    std::thread::sleep(Duration::from_millis(100));
    assert!(handle.is_playing());
    assert!(probe.frames_written() > 0);

    let started = Instant::now();
    mixer.stop();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(500) + Duration::from_millis(250), "stop took {:?}", elapsed);
    assert!(!mixer.is_running());
    assert!(!probe.is_open());
    assert!(handle.is_stopped());
}

#[test]
fn test_restart_after_stop() {
    let line = CaptureLine::new();
    let probe = line.probe();
    let mixer = Mixer::new(Box::new(line), config(256), Duration::from_millis(20), Arc::default());

    mixer.start().unwrap();
    mixer.stop();
    mixer.start().unwrap();
    assert!(mixer.is_running());
    assert_eq!(probe.open_count(), 2);

    let events = mixer.subscribe();
    mixer.submit(tone_voice(20, false));
    let event = wait_for_event(&events, Duration::from_secs(2), |e| matches!(e, MixerEvent::VoiceStopped { .. }));
    assert!(matches!(
        event,
        MixerEvent::VoiceStopped {
            reason: StopReason::Finished,
            ..
        }
    ));
    mixer.stop();
}

#[test]
fn test_overlapping_voices_all_finish() {
    let line = CaptureLine::new();
    let mixer = Mixer::new(Box::new(line), config(512), Duration::from_millis(20), Arc::default());
    let events = mixer.subscribe();
    mixer.start().unwrap();

    let handles: Vec<_> = (0..8).map(|i| mixer.submit(tone_voice(50 + i * 10, false))).collect();

    let mut finished = 0;
    while finished < handles.len() {
        wait_for_event(&events, Duration::from_secs(5), |e| {
            matches!(
                e,
                MixerEvent::VoiceStopped {
                    reason: StopReason::Finished,
                    ..
                }
            )
        });
        finished += 1;
    }
    assert!(handles.iter().all(|h| h.is_stopped()));
    assert_eq!(mixer.active_voices(), 0);
    mixer.stop();
}

#[test]
fn test_paused_voice_holds_position() {
    let line = CaptureLine::paced();
    let mixer = Mixer::new(Box::new(line), config(256), Duration::from_millis(20), Arc::default());
    mixer.start().unwrap();

    let handle = mixer.submit(tone_voice(1000, false));
    std::thread::sleep(Duration::from_millis(50));
    handle.pause();
    std::thread::sleep(Duration::from_millis(20));
    let paused_at = handle.position_frames();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.position_frames(), paused_at);

    handle.resume();
    std::thread::sleep(Duration::from_millis(50));
    assert!(handle.position_frames() > paused_at);
    mixer.stop();
}
