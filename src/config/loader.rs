// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawSchedulerConfig, SchedulerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawSchedulerConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSchedulerConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawSchedulerConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for hosts embedding the scheduler.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<SchedulerConfig> {
    let raw = load_from_path(path)?;
    SchedulerConfig::try_from(raw)
}

/// Parse and validate configuration from an in-memory TOML string.
pub fn from_toml_str(contents: &str) -> Result<SchedulerConfig> {
    let raw: RawSchedulerConfig = toml::from_str(contents)?;
    SchedulerConfig::try_from(raw)
}

/// Default config path: `Fairsched.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Fairsched.toml")
}
