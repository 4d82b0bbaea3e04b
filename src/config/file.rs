//! Persisted configuration file
//!
//! The dashboard writes `config.json`; a `.toml` path is read and written as
//! TOML instead. All keys are optional and missing keys take defaults.

use std::path::{Path, PathBuf};

use super::RuntimeConfig;
use crate::Result;

/// On-disk encoding of the config record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON (shared with the dashboard)
    Json,
    /// TOML
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension; anything but `.toml` is JSON
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Parse a config record from text
///
/// # Errors
///
/// Returns error if the text is not a valid record in `format`
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<RuntimeConfig> {
    let config: RuntimeConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };
    Ok(config.normalized())
}

/// Read and parse the config record at `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, ConfigFormat::from_path(path))
}

/// Write a config record to `path`, creating parent directories
///
/// # Errors
///
/// Returns error if encoding or writing fails
pub fn write_config(path: &Path, config: &RuntimeConfig) -> Result<()> {
    let content = match ConfigFormat::from_path(path) {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    tracing::debug!(path = %path.display(), "config written");
    Ok(())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "jasper", "jasper")
}

/// Default config path: `~/.config/jasper/config.json` on Linux
#[must_use]
pub fn default_config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("config.json"),
        |d| d.config_dir().join("config.json"),
    )
}

/// Default data directory (conversation history)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("data"), |d| d.data_dir().to_path_buf())
}

/// Default log directory
#[must_use]
pub fn default_log_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("logs"), |d| d.data_dir().join("logs"))
}
