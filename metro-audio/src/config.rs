//! Configuration for the metro-audio engine
//!
//! A single TOML file drives the mixer, codec, engine and output line. Every
//! field has a built-in default, so an absent file (or an absent section)
//! still produces a working engine.
//!
//! # File resolution
//!
//! 1. `--config` command-line argument
//! 2. `METRO_AUDIO_CONFIG` environment variable
//! 3. `~/.config/metro-audio/config.toml` (or `/etc/metro-audio/config.toml`)
//! 4. Built-in defaults
//!
//! # Example
//!
//! ```toml
//! sound_root = "/usr/share/metro/sounds"
//!
//! [mixer]
//! block_frames = 1024
//! shutdown_timeout_ms = 1000
//!
//! [engine]
//! fade_tick_ms = 20
//! fade_curve = "s_curve"
//! ```

use crate::error::Result;
use metro_common::FadeCurve;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config and data folder lookup
pub const APP_NAME: &str = "metro-audio";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "METRO_AUDIO_CONFIG";

/// Environment variable naming the sound resource folder
pub const SOUND_ROOT_ENV_VAR: &str = "METRO_SOUND_ROOT";

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioConfig {
    /// Folder sound resources are loaded from (optional)
    pub sound_root: Option<PathBuf>,

    /// Mixer thread settings
    pub mixer: MixerConfig,

    /// Decoder settings
    pub codec: CodecConfig,

    /// Engine façade settings
    pub engine: EngineConfig,

    /// Hardware line settings
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Mixer thread settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Frames mixed per block written to the line
    pub block_frames: usize,

    /// Sleep between blocks when the line accepts data without blocking
    pub write_interval_ms: u64,

    /// Longest the idle mixer waits on the command queue before re-checking
    /// its running flag
    pub idle_wait_ms: u64,

    /// Bound on `stop()` waiting for the mixer thread and the line
    pub shutdown_timeout_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            block_frames: 1024,
            write_interval_ms: 2,
            idle_wait_ms: 50,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl MixerConfig {
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Decoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Bytes scanned for a frame sync before the stream is declared malformed
    pub max_sync_scan_bytes: usize,

    /// Decoded chunks buffered ahead of a streaming voice
    pub stream_queue_chunks: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_sync_scan_bytes: 64 * 1024,
            stream_queue_chunks: 16,
        }
    }
}

/// Engine façade settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between volume updates of a running fade
    pub fade_tick_ms: u64,

    /// Shape of music fades
    pub fade_curve: FadeCurve,

    /// Initial master volume (0.0 to 1.0)
    pub global_volume: f32,

    /// Initial music category volume (0.0 to 1.0)
    pub music_volume: f32,

    /// Initial sound effect category volume (0.0 to 1.0)
    pub sfx_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fade_tick_ms: 20,
            fade_curve: FadeCurve::Linear,
            global_volume: 1.0,
            music_volume: 1.0,
            sfx_volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn fade_tick(&self) -> Duration {
        Duration::from_millis(self.fade_tick_ms.max(1))
    }
}

/// Hardware line settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Capacity of the ring between mixer thread and device callback, in frames
    pub ring_frames: usize,

    /// Poll interval while a write waits for ring space
    pub write_poll_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            ring_frames: 8192,
            write_poll_ms: 2,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AudioConfig {
    /// Resolve and load the configuration file.
    ///
    /// `cli_path` takes priority over the environment and per-user locations.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = metro_common::config::resolve_config_file(cli_path, CONFIG_ENV_VAR, APP_NAME);
        let config: AudioConfig = metro_common::config::load_toml_or_default(path.as_deref())?;
        Ok(config)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Folder sound resources are loaded from.
    pub fn resolve_sound_root(&self, cli_arg: Option<&Path>) -> PathBuf {
        metro_common::config::resolve_sound_root(
            cli_arg,
            SOUND_ROOT_ENV_VAR,
            self.sound_root.as_deref(),
            APP_NAME,
        )
    }
}
