//! Configuration management for the CLI
//!
//! Client settings are merged from:
//! - Default values
//! - The first configuration file found (YAML or JSON)
//! - `COURIER_*` environment variables
//! - Command-line arguments

use crate::error::{Error, Result};
use courier_core::ClientSettings;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Effective CLI configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Settings the HTTP client is built from
    pub client: ClientSettings,

    /// File the settings were read from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Directory the token store writes to
    pub token_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientSettings::default(),
            source: None,
            token_dir: default_token_dir(),
        }
    }
}

/// `$CACHE/courier`, falling back to `~/.cache/courier`
fn default_token_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("courier"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache").join("courier")))
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

impl Config {
    /// Load client settings from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            client: ClientSettings::from_file(path)?,
            source: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Using configuration file");
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations, then
    /// apply environment overrides
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::load()?,
        };
        config.client.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, base_url: Option<String>, token_dir: Option<PathBuf>) -> Self {
        if let Some(base_url) = base_url {
            self.client.base_url = Some(base_url);
        }
        if let Some(token_dir) = token_dir {
            self.token_dir = token_dir;
        }
        self
    }

    /// Default configuration file paths, in lookup order
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("courier.yaml"),
            PathBuf::from("courier.json"),
            PathBuf::from(".courier.yaml"),
            PathBuf::from(".courier.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            let courier_dir = config_dir.join("courier");
            paths.push(courier_dir.join("config.yaml"));
            paths.push(courier_dir.join("config.json"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".courier.yaml"));
            paths.push(home_dir.join(".courier.json"));
        }

        paths
    }
}
