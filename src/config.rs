//! Optional TOML configuration for the upload front end. Command-line flags
//! take precedence over config-file values.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_derive::Deserialize;

/// Config file name looked for when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "csv2powermeter.toml";

/// Environment variable overriding the default config file location.
pub const CONFIG_PATH_VAR: &str = "CSV2POWERMETER_CONFIG";

/// Uploader settings; every field can also be given on the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploaderConfig {
    /// AuthSub token for the service.
    pub token: Option<String>,
    /// Variable path to post readings on.
    pub variable: Option<String>,
    /// URI prefix of the service to contact.
    pub service: Option<String>,
    /// Measurement uncertainty in kilowatt-hours.
    pub uncertainty: Option<f64>,
    /// Timestamp uncertainty in seconds.
    pub time_uncertainty: Option<f64>,
}

impl UploaderConfig {
    /// Loads settings from an explicit path, or from the `CSV2POWERMETER_CONFIG`
    /// location, or from `csv2powermeter.toml`. When no explicit path is
    /// given, a missing file just yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            return toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", path.display()));
        }

        let fallback = PathBuf::from(
            env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()),
        );
        if !fallback.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&fallback)?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", fallback.display()))
    }
}
