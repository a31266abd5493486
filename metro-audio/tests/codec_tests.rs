//! Decoder integration tests over synthetic MPEG streams and WAV data

mod helpers;

use helpers::*;
use metro_audio::codec::sync::FrameSync;
use metro_audio::codec::{decode_clip, MpegStream, VbrKind};
use metro_audio::config::CodecConfig;
use metro_audio::{AudioFormat, Error};
use std::time::Duration;

const SCAN: usize = 64 * 1024;

#[test]
fn test_frame_size_predicts_next_sync() {
    let specs = [
        FrameSpec::new(1, 4, true),
        FrameSpec::new(1, 14, false),
        FrameSpec::new(2, 10, false),
        FrameSpec::new(2, 4, true).padded(),
        FrameSpec::new(3, 9, false),
        FrameSpec::new(3, 1, true).padded(),
    ];

    for spec in specs {
        let frame = spec.assemble(None, &[]);
        let data = stream_of(&frame, 4);
        let mut sync = FrameSync::new(&data, SCAN);

        let mut offsets = Vec::new();
        while let Some(frame) = sync.next_frame().unwrap() {
            assert_eq!(frame.header.frame_length(), spec.frame_len(), "{:?}", spec);
            offsets.push(frame.offset);
        }
        let expected: Vec<usize> = (0..4).map(|i| i * spec.frame_len()).collect();
        assert_eq!(offsets, expected, "{:?}", spec);
    }
}

#[test]
fn test_layer1_tone_decodes_deterministically() {
    let spec = FrameSpec::new(1, 4, true).with_crc();
    let data = stream_of(&layer1_tone_frame(&spec, false), 10);

    let first = MpegStream::new(&data, SCAN).decode_to_end().unwrap();
    let second = MpegStream::new(&data, SCAN).decode_to_end().unwrap();

    assert_eq!(first.format(), AudioFormat::new(44100, 1));
    assert_eq!(first.sample_count(), 10 * 384);
    assert_eq!(first.samples(), second.samples());
    assert!(first.samples().iter().any(|s| s.unsigned_abs() > 1000), "tone should be audible");
}

#[test]
fn test_layer1_stereo_silence() {
    let spec = FrameSpec::new(1, 8, false).with_crc();
    let data = stream_of(&layer1_silent_frame(&spec), 5);

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();

    assert_eq!(clip.format(), AudioFormat::new(44100, 2));
    assert_eq!(clip.frame_count(), 5 * 384);
    assert!(clip.samples().iter().all(|s| *s == 0));
    assert_eq!(stream.stats().crc_mismatches, 0);
}

#[test]
fn test_crc_mismatch_is_tolerated() {
    let spec = FrameSpec::new(1, 4, true).with_crc();
    let good = stream_of(&layer1_tone_frame(&spec, false), 3);
    let bad = stream_of(&layer1_tone_frame(&spec, true), 3);

    let mut stream = MpegStream::new(&bad, SCAN);
    let clip = stream.decode_to_end().unwrap();
    let stats = stream.stats();

    assert_eq!(stats.frames_decoded, 3);
    assert_eq!(stats.crc_mismatches, 3);
    assert_eq!(clip.samples(), MpegStream::new(&good, SCAN).decode_to_end().unwrap().samples());
}

#[test]
fn test_reserved_scalefactor_skips_frame() {
    let spec = FrameSpec::new(1, 4, true).with_crc();
    let good = layer1_tone_frame(&spec, false);
    let bad = layer1_frame_with_scalefactor(&spec, 63, false);

    let mut data = stream_of(&good, 2);
    data.extend(&bad);
    data.extend(stream_of(&good, 2));

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();
    let stats = stream.stats();

    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_decoded, 4);
    assert_eq!(clip.sample_count(), 4 * 384);

    // The bad frame leaves no trace in the filter bank
    let clean = MpegStream::new(&stream_of(&good, 4), SCAN).decode_to_end().unwrap();
    assert_eq!(clip.samples(), clean.samples());
}

#[test]
fn test_layer2_joint_stereo_tone() {
    let spec = FrameSpec::new(2, 10, false).joint_stereo(0).with_crc();
    let data = stream_of(&layer2_tone_frame(&spec), 4);

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();
    let stats = stream.stats();

    assert_eq!(clip.format(), AudioFormat::new(44100, 2));
    assert_eq!(clip.frame_count(), 4 * 1152);
    assert_eq!(stats.frames_decoded, 4);
    assert_eq!(stats.crc_mismatches, 0);

    let left: Vec<i16> = clip.samples().iter().step_by(2).copied().collect();
    let right: Vec<i16> = clip.samples().iter().skip(1).step_by(2).copied().collect();
    assert!(left.iter().any(|s| s.unsigned_abs() > 500), "left channel should be audible");
    assert!(right.iter().any(|s| s.unsigned_abs() > 500), "right channel should be audible");
    assert_ne!(left, right, "channels carry different scalefactors");

    let again = MpegStream::new(&data, SCAN).decode_to_end().unwrap();
    assert_eq!(clip.samples(), again.samples());
}

#[test]
fn test_layer2_silence() {
    let spec = FrameSpec::new(2, 10, false);
    let data = stream_of(&layer2_silent_frame(&spec), 4);

    let clip = MpegStream::new(&data, SCAN).decode_to_end().unwrap();
    assert_eq!(clip.format(), AudioFormat::new(44100, 2));
    assert_eq!(clip.frame_count(), 4 * 1152);
    assert!(clip.samples().iter().all(|s| *s == 0));
}

#[test]
fn test_layer3_silence() {
    let spec = FrameSpec::new(3, 9, false);
    let data = stream_of(&layer3_silent_frame(&spec), 6);

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();

    assert_eq!(clip.format(), AudioFormat::new(44100, 2));
    assert_eq!(clip.frame_count(), 6 * 1152);
    assert!(clip.samples().iter().all(|s| *s == 0));
    assert_eq!(stream.stats().frames_decoded, 6);
}

#[test]
fn test_xing_frame_is_not_audio() {
    let spec = FrameSpec::new(3, 9, false);
    let mut data = xing_frame(&spec, 8, 8 * spec.frame_len() as u32);
    data.extend(stream_of(&layer3_silent_frame(&spec), 8));

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();
    let info = stream.info().unwrap();

    assert_eq!(clip.frame_count(), 8 * 1152);
    let vbr = info.vbr.expect("Xing tag");
    assert_eq!(vbr.kind, VbrKind::Xing);
    assert_eq!(vbr.frame_count, Some(8));

    let expected = Duration::from_secs_f64(8.0 * 1152.0 / 44100.0);
    let diff = info.estimated_duration.as_secs_f64() - expected.as_secs_f64();
    assert!(diff.abs() < 1e-6);
}

#[test]
fn test_cbr_duration_estimate() {
    let spec = FrameSpec::new(2, 10, false);
    let data = stream_of(&layer2_silent_frame(&spec), 20);

    let mut stream = MpegStream::new(&data, SCAN);
    stream.decode_to_end().unwrap();
    let info = stream.info().unwrap();

    assert!(info.vbr.is_none());
    let expected = 20.0 * 1152.0 / 44100.0;
    let estimated = info.estimated_duration.as_secs_f64();
    assert!((estimated - expected).abs() < 0.01, "estimated {}s, expected {}s", estimated, expected);
}

#[test]
fn test_sync_recovers_through_garbage() {
    let spec = FrameSpec::new(1, 4, true);
    let frame = layer1_silent_frame(&spec);

    let mut data = stream_of(&frame, 3);
    data.extend(std::iter::repeat(0x55).take(100));
    data.extend(stream_of(&frame, 3));

    let mut stream = MpegStream::new(&data, SCAN);
    let clip = stream.decode_to_end().unwrap();

    assert_eq!(clip.sample_count(), 6 * 384);
    assert_eq!(stream.stats().bytes_skipped, 100);
}

#[test]
fn test_id3v2_tag_is_skipped() {
    let spec = FrameSpec::new(1, 4, true);
    let frames = stream_of(&layer1_tone_frame(&spec, false), 4);

    let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x20".to_vec();
    data.extend(vec![0xFFu8; 32]);
    data.extend(&frames);

    let tagged = MpegStream::new(&data, SCAN).decode_to_end().unwrap();
    let plain = MpegStream::new(&frames, SCAN).decode_to_end().unwrap();
    assert_eq!(tagged.samples(), plain.samples());
}

#[test]
fn test_scan_limit_fails_stream() {
    let config = CodecConfig {
        max_sync_scan_bytes: 4096,
        ..CodecConfig::default()
    };
    let garbage = vec![0u8; 100_000];
    assert!(matches!(decode_clip(&garbage, &config), Err(Error::MalformedStream(_))));
}

#[test]
fn test_wav_resources_decode() {
    let config = CodecConfig::default();
    let data = sine_wav_bytes(22050, 1, 500, 440.0, 0.5);

    let clip = decode_clip(&data, &config).unwrap();
    assert_eq!(clip.format(), AudioFormat::new(22050, 1));
    assert_eq!(clip.frame_count(), 11025);
    assert!(clip.samples().iter().any(|s| *s > 10000));
}
