//! SoundEngine tests: effect cache, music slot, crossfades and the playlist
//!
//! Engines run on paced capture lines so voices progress in real time.

mod helpers;

use helpers::*;
use metro_audio::config::SOUND_ROOT_ENV_VAR;
use metro_audio::{AudioConfig, CaptureLine, Error, MixerEvent, SoundEngine, StopReason, VoiceCategory, LINE_FORMAT};
use serial_test::serial;
use std::time::{Duration, Instant};

fn test_config() -> AudioConfig {
    let mut config = AudioConfig::default();
    config.mixer.block_frames = 512;
    config.mixer.write_interval_ms = 0;
    config
}

fn engine() -> SoundEngine {
    SoundEngine::with_line(Box::new(CaptureLine::paced()), test_config()).unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn test_crossfade_to_new_music() {
    let engine = engine();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 1000, 220.0, 0.5), "A")
        .unwrap();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 1000, 330.0, 0.5), "B")
        .unwrap();

    let a = engine.play_music("A", 1.0, true).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let b = engine.fade_to_music("B", 1.0, 2.0).unwrap();
    assert!(b.is_looping(), "new track inherits looping");
    assert_eq!(engine.music_handle().unwrap().id(), b.id());

    std::thread::sleep(Duration::from_millis(1000));
    assert!(a.is_playing());
    assert!(a.volume() > 0.0 && a.volume() < 1.0, "A at {}", a.volume());
    assert!(b.volume() > 0.0 && b.volume() < 1.0, "B at {}", b.volume());

    std::thread::sleep(Duration::from_millis(1300));
    assert!(a.is_stopped());
    assert_eq!(a.volume(), 0.0);
    assert!(b.is_playing());
    assert_eq!(b.volume(), 1.0);
    engine.shutdown();
}

#[test]
fn test_fade_without_current_music_fades_in() {
    let engine = engine();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 500, 220.0, 0.5), "intro")
        .unwrap();

    let handle = engine.fade_to_music("intro", 0.6, 0.2).unwrap();
    assert!(!handle.is_looping());
    assert!(eventually(Duration::from_secs(1), || handle.volume() == 0.6));
    engine.shutdown();
}

#[test]
fn test_queue_plays_in_order() {
    let engine = engine();
    for key in ["one", "two", "three"] {
        engine
            .load_sound_bytes(&sine_wav_bytes(44100, 2, 100, 440.0, 0.3), key)
            .unwrap();
        engine.enqueue_music(key);
    }
    let events = engine.subscribe();

    let first = engine.play_music_queue(false).unwrap().expect("first track");
    assert_eq!(engine.queued_music(), vec!["two", "three"]);

    let mut finished = vec![];
    while finished.len() < 3 {
        match wait_for_event(&events, Duration::from_secs(3), |e| {
            matches!(e, MixerEvent::VoiceStopped { category: VoiceCategory::Music, .. })
        }) {
            MixerEvent::VoiceStopped { id, reason, .. } => {
                assert_eq!(reason, StopReason::Finished);
                finished.push(id);
            }
            MixerEvent::Stopped => unreachable!(),
        }
    }

    assert_eq!(finished[0], first.id());
    assert!(finished.windows(2).all(|w| w[0] < w[1]));
    assert!(engine.queued_music().is_empty());
    assert!(eventually(Duration::from_millis(500), || engine
        .music_handle()
        .map(|h| h.is_stopped())
        .unwrap_or(true)));
    engine.shutdown();
}

#[test]
fn test_looping_queue_recycles() {
    let engine = engine();
    for key in ["a", "b"] {
        engine
            .load_sound_bytes(&sine_wav_bytes(44100, 2, 80, 440.0, 0.3), key)
            .unwrap();
        engine.enqueue_music(key);
    }
    let events = engine.subscribe();
    engine.play_music_queue(true).unwrap().expect("first track");

    // Four tracks end, so the two-key playlist went round twice
    for _ in 0..4 {
        wait_for_event(&events, Duration::from_secs(3), |e| {
            matches!(
                e,
                MixerEvent::VoiceStopped {
                    category: VoiceCategory::Music,
                    reason: StopReason::Finished,
                    ..
                }
            )
        });
    }
    assert!(engine.music_handle().is_some());

    engine.stop_music();
    assert!(engine.music_handle().is_none());
    engine.shutdown();
}

#[test]
fn test_manual_music_halts_queue() {
    let engine = engine();
    for key in ["q1", "q2", "manual"] {
        engine
            .load_sound_bytes(&sine_wav_bytes(44100, 2, 100, 440.0, 0.3), key)
            .unwrap();
    }
    engine.enqueue_music("q1");
    engine.enqueue_music("q2");
    let events = engine.subscribe();

    engine.play_music_queue(false).unwrap();
    let manual = engine.play_music("manual", 1.0, false).unwrap();

    wait_for_event(&events, Duration::from_secs(3), |e| {
        matches!(e, MixerEvent::VoiceStopped { id, .. } if *id == manual.id())
    });
    std::thread::sleep(Duration::from_millis(100));

    // q2 never started
    assert_eq!(engine.music_handle().unwrap().id(), manual.id());
    assert_eq!(engine.queued_music(), vec!["q2"]);
    engine.shutdown();
}

#[test]
fn test_queue_skips_unknown_keys() {
    let engine = engine();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 100, 440.0, 0.3), "real")
        .unwrap();
    engine.enqueue_music("missing");
    engine.enqueue_music("real");

    let handle = engine.play_music_queue(false).unwrap().expect("playable track");
    assert_eq!(engine.music_handle().unwrap().id(), handle.id());
    assert!(engine.queued_music().is_empty());
    engine.shutdown();
}

#[test]
fn test_unknown_keys() {
    let engine = engine();
    assert!(matches!(engine.play_sound("ghost", 1.0, false), Err(Error::UnknownSoundKey(_))));
    assert!(matches!(engine.fade_to_music("ghost", 1.0, 1.0), Err(Error::UnknownSoundKey(_))));
    assert!(engine.music_handle().is_none());
    engine.shutdown();
}

#[test]
#[serial]
fn test_load_sound_from_sound_root() {
    std::env::remove_var(SOUND_ROOT_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    generate_sine_wav(&dir.path().join("horn.wav"), 22050, 1, 250, 440.0, 0.5).unwrap();

    let mut config = test_config();
    config.sound_root = Some(dir.path().to_path_buf());
    let engine = SoundEngine::with_line(Box::new(CaptureLine::paced()), config).unwrap();

    engine.load_sound("horn.wav", "horn").unwrap();
    assert!(engine.has_sound("horn"));

    let clip = engine.clip("horn").unwrap();
    assert_eq!(clip.format(), LINE_FORMAT);
    let frames = clip.frame_count() as i64;
    assert!((frames - 11025).abs() < 64, "got {} frames", frames);

    assert!(matches!(engine.load_sound("absent.wav", "absent"), Err(Error::Io(_))));
    assert!(!engine.has_sound("absent"));
    engine.shutdown();
}

#[test]
fn test_sound_effects_overlap() {
    let engine = engine();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 200, 880.0, 0.2), "click")
        .unwrap();
    let events = engine.subscribe();

    let first = engine.play_sound("click", 0.5, false).unwrap();
    let second = engine.play_ui_sound("click").unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(second.volume(), 1.0);

    let mut stopped = vec![];
    while stopped.len() < 2 {
        if let MixerEvent::VoiceStopped { id, reason, .. } =
            wait_for_event(&events, Duration::from_secs(3), |e| matches!(e, MixerEvent::VoiceStopped { .. }))
        {
            assert_eq!(reason, StopReason::Finished);
            stopped.push(id);
        }
    }
    stopped.sort();
    assert_eq!(stopped, vec![first.id(), second.id()]);
    engine.shutdown();
}

#[test]
fn test_registered_mpeg_music_streams_to_end() {
    let engine = engine();
    let spec = FrameSpec::new(1, 4, true);
    engine
        .register_music_bytes(stream_of(&layer1_tone_frame(&spec, false), 30), "theme")
        .unwrap();
    let events = engine.subscribe();

    let handle = engine.play_music("theme", 1.0, false).unwrap();
    let event = wait_for_event(&events, Duration::from_secs(3), |e| {
        matches!(e, MixerEvent::VoiceStopped { id, .. } if *id == handle.id())
    });

    assert!(matches!(
        event,
        MixerEvent::VoiceStopped {
            reason: StopReason::Finished,
            ..
        }
    ));
    assert_eq!(handle.position_frames(), 30 * 384);
    engine.shutdown();
}

#[test]
fn test_shutdown_stops_music() {
    let engine = engine();
    engine
        .load_sound_bytes(&sine_wav_bytes(44100, 2, 100, 440.0, 0.3), "loop")
        .unwrap();
    let handle = engine.play_music("loop", 1.0, true).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    engine.shutdown();
    assert!(!engine.is_running());
    assert!(handle.is_stopped());
}
