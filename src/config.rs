//! Build configuration module.
//!
//! Handles loading, validating, and merging `ditto.toml`. Stock defaults are
//! overridden by whatever keys the user file sets; the CLI then overrides the
//! file for the flags it exposes.
//!
//! ## Config File Location
//!
//! `ditto.toml` lives in the working directory, next to the source tree:
//!
//! ```text
//! site/
//! ├── ditto.toml      # Build config (optional)
//! ├── src/            # Source tree (every file becomes a document)
//! └── build/          # Destination tree
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! source = "src"            # Source directory, relative to the working directory
//! destination = "build"     # Destination directory
//! clobber = true            # Empty the destination before stages run
//! concurrency = 64          # Max in-flight file reads/writes
//! # stage_timeout_secs = 30 # Fail a stage that runs longer (default: no limit)
//!
//! [metadata]                # Shared data handed to every stage
//! site_name = "My Site"
//! ```
//!
//! Unknown top-level keys are rejected to catch typos early. The
//! `[metadata]` table is free-form.

use crate::pipeline::DEFAULT_CONCURRENCY;
use crate::stage::Metadata;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "ditto.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `ditto.toml`.
///
/// All fields have defaults; user files need only set what they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Source directory, relative to the working directory.
    pub source: String,
    /// Destination directory, relative to the working directory.
    pub destination: String,
    /// Erase the destination's contents before stages run.
    pub clobber: bool,
    /// Maximum number of file reads or writes in flight.
    pub concurrency: usize,
    /// Per-stage time limit in seconds. Absent means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,
    /// Shared metadata for stages.
    pub metadata: Metadata,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: "src".to_string(),
            destination: "build".to_string(),
            clobber: true,
            concurrency: DEFAULT_CONCURRENCY,
            stage_timeout_secs: None,
            metadata: Metadata::new(),
        }
    }
}

impl BuildConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::Validation("source must not be empty".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(ConfigError::Validation(
                "destination must not be empty".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "stage_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// Base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(BuildConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(config_path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `ditto.toml` from the given directory, or defaults if absent.
pub fn load_config(dir: &Path) -> Result<BuildConfig, ConfigError> {
    load_config_file(&dir.join(CONFIG_FILE_NAME))
}

/// Load a config file at an explicit path, or defaults if absent.
pub fn load_config_file(path: &Path) -> Result<BuildConfig, ConfigError> {
    resolve_config(load_raw_config(path)?)
}

/// Returns a fully-commented stock `ditto.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Ditto Configuration
# ===================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Source directory, relative to this file's directory.
# Every file below it (recursively, dotfiles included) becomes a document.
source = "src"

# Destination directory, relative to this file's directory.
destination = "build"

# Erase everything inside the destination before stages run.
# Turn off to keep files that earlier builds or other tools put there.
clobber = true

# Maximum number of file reads or writes in flight at once.
concurrency = 64

# Fail the build when a single stage runs longer than this many seconds.
# Unset means stages may run as long as they like.
# stage_timeout_secs = 30

# ---------------------------------------------------------------------------
# Shared metadata
# ---------------------------------------------------------------------------
# Free-form table handed to every stage. Stages may read it and add to it.
[metadata]
# site_name = "My Site"
"##
}
