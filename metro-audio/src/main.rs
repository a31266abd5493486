//! metro-audio command-line tool
//!
//! Inspects and plays sound resources through the same decoder and engine
//! the simulation uses.
//!
//! ```bash
//! metro-audio probe station_chime.mp3
//! metro-audio play door_close.wav --volume 0.8
//! metro-audio music theme_a.mp3 theme_b.mp3 --loop-queue
//! metro-audio devices
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use metro_audio::audio::output::{default_device_name, list_devices};
use metro_audio::codec::{wav, MpegStream, SourceKind};
use metro_audio::{AudioConfig, MixerEvent, SoundEngine, VoiceHandle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for metro-audio
#[derive(Parser, Debug)]
#[command(name = "metro-audio")]
#[command(about = "MPEG audio decoder and sound engine for the metro simulation")]
#[command(version)]
struct Args {
    /// Configuration file (overrides METRO_AUDIO_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print stream header, VBR tag, duration estimate and decode statistics
    Probe {
        file: PathBuf,
    },

    /// Play a sound effect
    Play {
        file: PathBuf,

        /// Voice volume (0.0 to 1.0)
        #[arg(long, default_value = "1.0")]
        volume: f32,

        /// Loop the sound
        #[arg(long = "loop")]
        looping: bool,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Play music files as a playlist
    Music {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Crossfade between tracks over this many seconds instead of
        /// playing each to its end
        #[arg(long)]
        fade: Option<f32>,

        /// Seconds each track plays before the next crossfade
        #[arg(long, default_value = "30")]
        track_seconds: u64,

        /// Start the playlist over when it runs out
        #[arg(long)]
        loop_queue: bool,
    },

    /// List output devices
    Devices,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AudioConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("metro_audio={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "metro-audio {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match args.command {
        Command::Probe { file } => probe(&file, &config),
        Command::Play {
            file,
            volume,
            looping,
            seconds,
        } => play(&file, config, volume, looping, seconds),
        Command::Music {
            files,
            fade,
            track_seconds,
            loop_queue,
        } => music(&files, config, fade, track_seconds, loop_queue),
        Command::Devices => devices(),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn probe(path: &Path, config: &AudioConfig) -> Result<()> {
    let data = read_file(path)?;

    if SourceKind::detect(&data) == SourceKind::Wav {
        let clip = wav::decode_wav(&data).context("Failed to decode WAV")?;
        println!("{}: WAV, {}", path.display(), clip.format());
        println!("  duration: {:.3}s ({} frames)", clip.duration().as_secs_f64(), clip.frame_count());
        return Ok(());
    }

    let mut stream = MpegStream::new(&data, config.codec.max_sync_scan_bytes);
    let clip = stream.decode_to_end().context("Failed to decode MPEG stream")?;
    let info = stream.info().context("Stream produced no frame header")?;
    let header = info.first_header;
    let stats = stream.stats();

    println!("{}: {}", path.display(), header);
    println!("  format:    {}", info.format);
    println!("  frame:     {} bytes, {} samples", header.frame_length(), header.samples_per_frame());
    match &info.vbr {
        Some(vbr) => println!(
            "  vbr tag:   {:?} (frames {:?}, bytes {:?}, toc {})",
            vbr.kind,
            vbr.frame_count,
            vbr.byte_count,
            if vbr.toc.is_some() { "present" } else { "absent" }
        ),
        None => println!("  vbr tag:   none"),
    }
    println!("  estimated: {:.3}s", info.estimated_duration.as_secs_f64());
    println!("  decoded:   {:.3}s ({} frames)", clip.duration().as_secs_f64(), clip.frame_count());
    println!(
        "  stats:     {} decoded, {} skipped, {} CRC mismatches, {} bytes resynced",
        stats.frames_decoded, stats.frames_skipped, stats.crc_mismatches, stats.bytes_skipped
    );
    Ok(())
}

fn play(path: &Path, config: AudioConfig, volume: f32, looping: bool, seconds: Option<f64>) -> Result<()> {
    let data = read_file(path)?;
    let engine = SoundEngine::new(config).context("Failed to start sound engine")?;
    let key = path.display().to_string();
    engine.load_sound_bytes(&data, key.as_str()).context("Failed to load sound")?;

    let events = engine.subscribe();
    let handle = engine.play_sound(&key, volume, looping)?;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));

    info!("Playing {} (voice {})", key, handle.id());
    wait_for_voice(&handle, &events, deadline);

    handle.stop();
    engine.shutdown();
    Ok(())
}

fn wait_for_voice(handle: &VoiceHandle, events: &Receiver<MixerEvent>, deadline: Option<Instant>) {
    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) => left.min(Duration::from_millis(250)),
                None => return,
            },
            None => Duration::from_millis(250),
        };

        match events.recv_timeout(wait) {
            Ok(MixerEvent::VoiceStopped { id, reason, .. }) if id == handle.id() => {
                info!("Voice {} stopped ({:?})", id, reason);
                return;
            }
            Ok(MixerEvent::Stopped) | Err(RecvTimeoutError::Disconnected) => return,
            _ => {}
        }
    }
}

fn music(paths: &[PathBuf], config: AudioConfig, fade: Option<f32>, track_seconds: u64, loop_queue: bool) -> Result<()> {
    let engine = SoundEngine::new(config).context("Failed to start sound engine")?;

    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let key = path.display().to_string();
        engine
            .register_music_bytes(read_file(path)?, key.as_str())
            .with_context(|| format!("Failed to register {}", key))?;
        keys.push(key);
    }

    match fade {
        Some(seconds) => {
            loop {
                for key in &keys {
                    engine.fade_to_music(key, 1.0, seconds)?;
                    std::thread::sleep(Duration::from_secs(track_seconds));
                }
                if !loop_queue {
                    break;
                }
            }
        }
        None => {
            for key in &keys {
                engine.enqueue_music(key.as_str());
            }
            if engine.play_music_queue(loop_queue)?.is_none() {
                bail!("Nothing to play");
            }
            while engine.music_handle().map(|h| !h.is_stopped()).unwrap_or(false)
                || !engine.queued_music().is_empty()
            {
                std::thread::sleep(Duration::from_millis(250));
            }
        }
    }

    engine.stop_music();
    engine.shutdown();
    Ok(())
}

fn devices() -> Result<()> {
    let default = default_device_name();
    for name in list_devices().context("Failed to enumerate output devices")? {
        let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}
