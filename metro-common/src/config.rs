//! Configuration file loading and sound root folder resolution
//!
//! Both resolvers follow the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config location (or TOML value for the sound root)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing configuration file never stops startup: the loader logs a
//! warning and hands back the built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locate the TOML configuration file for `app_name`.
///
/// Returns `None` when no candidate exists, in which case callers run on
/// built-in defaults.
pub fn resolve_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config directory, then system-wide on Linux
    let user_config = dirs::config_dir().map(|d| d.join(app_name).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(app_name).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML configuration file, falling back to `T::default()`.
///
/// A path that does not exist produces a warning and defaults. A file that
/// exists but fails to parse is an error: silently ignoring a typo in a
/// config file hides the problem.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        debug!("No configuration file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Configuration file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<T>(&content).map_err(|e| {
        Error::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve the folder sound resources are loaded from.
pub fn resolve_sound_root(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
    app_name: &str,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_data_folder(app_name)
}

/// OS-dependent default data folder for `app_name`.
pub fn default_data_folder(app_name: &str) -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/<app>
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(app_name))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/<app>
        dirs::data_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(app_name))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\<app>
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData").join(app_name))
    } else {
        PathBuf::from(format!("./{}_data", app_name))
    }
}
