//! Config file location and loading.

use std::path::PathBuf;

use tracing::info;

use crate::config::Config;
use crate::error::CoreError;

/// Load configuration from the given path, or the default location.
///
/// A missing file at the default location means defaults; a missing file
/// that was asked for explicitly is an error.
pub fn load_config(path: Option<&str>) -> Result<Config, CoreError> {
    let explicit = path.is_some();
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| CoreError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if explicit {
        Err(CoreError::Config(format!(
            "config file not found: {}",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("peerline")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
