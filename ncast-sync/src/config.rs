//! ncast-sync configuration
//!
//! The bootstrap TOML file carries the shared `stations_root` and `[logging]`
//! keys plus a `[sync]` table with engine tuning.

use crate::error::{SyncError, SyncResult};
use crate::services::retry::RetryPolicy;
use ncast_common::config::{default_config_path, load_toml, TomlConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Module name used for the default config file location
pub const MODULE_NAME: &str = "ncast-sync";

/// Engine tuning from the `[sync]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Worker pool size bounding every collaborator call
    pub workers: usize,
    /// Playlists reconciled at the same time
    pub playlist_concurrency: usize,
    /// Album lookup attempts per row before deferring
    pub lookup_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub lookup_timeout_secs: u64,
    pub fetch_attempts: u32,
    pub fetch_timeout_secs: u64,
    pub tag_timeout_secs: u64,
    /// Whole-run timeout; no limit when absent
    pub run_timeout_secs: Option<u64>,
    /// Confirm a row whose declared album equals the embedded album
    pub trust_embedded_album: bool,
    /// Validate rows whose file is not on disk yet (before fetching)
    pub validate_missing: bool,
    /// Audio format requested from the fetcher and used for file names
    pub audio_format: String,
    /// Download command for the external fetcher
    pub fetch_command: String,
    /// Contact address sent in the MusicBrainz user agent
    pub musicbrainz_contact: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            playlist_concurrency: 1,
            lookup_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            lookup_timeout_secs: 20,
            fetch_attempts: 2,
            fetch_timeout_secs: 600,
            tag_timeout_secs: 30,
            run_timeout_secs: None,
            trust_embedded_album: true,
            validate_missing: true,
            audio_format: "mp3".to_string(),
            fetch_command: "yt-dlp".to_string(),
            musicbrainz_contact: None,
        }
    }
}

impl SyncSettings {
    /// Reject settings that would make the run meaningless
    pub fn validate(&self) -> SyncResult<()> {
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be at least 1".to_string()));
        }
        if self.playlist_concurrency == 0 {
            return Err(SyncError::Config(
                "playlist_concurrency must be at least 1".to_string(),
            ));
        }
        if self.lookup_attempts == 0 {
            return Err(SyncError::Config(
                "lookup_attempts must be at least 1".to_string(),
            ));
        }
        if self.audio_format.trim().is_empty() {
            return Err(SyncError::Config("audio_format must not be empty".to_string()));
        }
        Ok(())
    }

    /// Retry policy for album lookups
    pub fn lookup_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.lookup_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(self.lookup_timeout_secs),
        }
    }

    /// Retry policy for fetches
    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn tag_timeout(&self) -> Duration {
        Duration::from_secs(self.tag_timeout_secs)
    }
}

/// Full contents of the ncast-sync TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncFileConfig {
    #[serde(flatten)]
    pub common: TomlConfig,

    #[serde(default)]
    pub sync: SyncSettings,
}

/// Load the TOML config.
///
/// An explicit path must exist. The default location is optional: when it
/// is absent, defaults are used.
pub fn load_file_config(explicit: Option<&Path>) -> SyncResult<SyncFileConfig> {
    if let Some(path) = explicit {
        return load_toml(path).map_err(|e| match e {
            ncast_common::Error::NotFound(p) => {
                SyncError::Config(format!("Config file not found: {}", p))
            }
            other => SyncError::Common(other),
        });
    }

    let Some(path) = default_config_path(MODULE_NAME) else {
        return Ok(SyncFileConfig::default());
    };

    match load_toml(&path) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "Loaded config file");
            Ok(config)
        }
        Err(ncast_common::Error::NotFound(_)) => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(SyncFileConfig::default())
        }
        Err(e) => Err(SyncError::Common(e)),
    }
}
