//! Configuration resolution tests
//!
//! Uses serial_test because several tests set or clear process-wide
//! environment variables.

use metro_common::config::{
    default_data_folder, load_toml_or_default, resolve_config_file, resolve_sound_root,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "METRO_COMMON_TEST_CONFIG";
const ROOT_ENV: &str = "METRO_COMMON_TEST_ROOT";

#[derive(Debug, Deserialize, Default, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    volume: f32,
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_argument() {
    env::set_var(CONFIG_ENV, "/tmp/from-env.toml");

    let resolved = resolve_config_file(None, CONFIG_ENV, "metro-common-test");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(CONFIG_ENV);
}

#[test]
#[serial]
fn test_cli_argument_beats_env_var() {
    env::set_var(CONFIG_ENV, "/tmp/from-env.toml");

    let resolved = resolve_config_file(
        Some(Path::new("/tmp/from-cli.toml")),
        CONFIG_ENV,
        "metro-common-test",
    );
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));

    env::remove_var(CONFIG_ENV);
}

#[test]
#[serial]
fn test_sound_root_priority_order() {
    env::remove_var(ROOT_ENV);

    // TOML value beats the compiled default
    let from_toml = resolve_sound_root(None, ROOT_ENV, Some(Path::new("/srv/sounds")), "metro-test");
    assert_eq!(from_toml, PathBuf::from("/srv/sounds"));

    // Environment beats TOML
    env::set_var(ROOT_ENV, "/opt/sounds");
    let from_env = resolve_sound_root(None, ROOT_ENV, Some(Path::new("/srv/sounds")), "metro-test");
    assert_eq!(from_env, PathBuf::from("/opt/sounds"));
    env::remove_var(ROOT_ENV);

    // Nothing configured falls back to the OS default
    let fallback = resolve_sound_root(None, ROOT_ENV, None, "metro-test");
    assert_eq!(fallback, default_data_folder("metro-test"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let config: SampleConfig =
        load_toml_or_default(Some(Path::new("/nonexistent/metro/config.toml"))).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_no_path_yields_defaults() {
    let config: SampleConfig = load_toml_or_default(None).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_valid_file_is_parsed() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name = \"depot\"\nvolume = 0.25").unwrap();

    let config: SampleConfig = load_toml_or_default(Some(file.path())).unwrap();
    assert_eq!(config.name, "depot");
    assert!((config.volume - 0.25).abs() < f32::EPSILON);
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name = [unterminated").unwrap();

    let result: metro_common::Result<SampleConfig> = load_toml_or_default(Some(file.path()));
    assert!(matches!(result, Err(metro_common::Error::Config(_))));
}
