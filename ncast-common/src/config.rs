//! Configuration loading and stations root resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the stations root folder
pub const STATIONS_ROOT_ENV: &str = "NCAST_STATIONS_ROOT";

/// Shared TOML configuration keys
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder containing one directory per station
    pub stations_root: Option<PathBuf>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging section of the TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// Optional log file; output is written there in addition to stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Stations root resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_stations_root(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml.stations_root {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_stations_root()
}

/// OS-dependent default stations root
pub fn default_stations_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("neuralcast"))
        .unwrap_or_else(|| PathBuf::from("./neuralcast_data"))
}

/// Default config file path for a tool, e.g. `~/.config/neuralcast/ncast-sync.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("neuralcast").join(format!("{}.toml", module_name)))
}

/// Load and deserialize a TOML file.
///
/// Returns `Error::NotFound` when the file does not exist so callers can
/// fall back to defaults, and `Error::Config` when it cannot be parsed.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
