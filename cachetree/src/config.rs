//! Configuration file loading
//!
//! `.json` files are parsed with serde_json, anything else as YAML.
//! Without an explicit path the loader looks for
//! `<config dir>/cachetree/config.yaml` and falls back to defaults.

use anyhow::{Context, Result};
use cachetree_core::{CacheError, SystemConfig};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default configuration file location (`~/.config/cachetree/config.yaml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cachetree").join("config.yaml"))
}

/// Load and validate the startup configuration
pub fn load(path: Option<&Path>) -> Result<SystemConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    };

    let config = match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            from_file(&path)?
        }
        None => {
            info!("No configuration file found, using defaults");
            SystemConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}

pub fn from_file(path: &Path) -> Result<SystemConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {:?}", path))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = if is_json {
        serde_json::from_str(&contents)
            .map_err(|e| CacheError::ConfigurationError(format!("{}: {}", path.display(), e)))?
    } else {
        parse_yaml(&contents)
            .map_err(|e| CacheError::ConfigurationError(format!("{}: {}", path.display(), e)))?
    };

    Ok(config)
}

pub fn parse_yaml(contents: &str) -> std::result::Result<SystemConfig, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}
