//! Audio fetcher driving an external downloader (yt-dlp by default)

use super::{FetchError, Fetcher, SourceHint};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use uuid::Uuid;

/// Fetcher that shells out to a yt-dlp compatible command
pub struct CommandFetcher {
    command: String,
    audio_format: String,
    staging_dir: PathBuf,
}

impl CommandFetcher {
    pub fn new(command: impl Into<String>, audio_format: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            audio_format: audio_format.into(),
            staging_dir: std::env::temp_dir().join("ncast-sync"),
        }
    }

    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Downloader arguments for one fetch, writing to `<stem>.<ext>`
    pub fn arguments(&self, hint: &SourceHint, artist: &str, title: &str, stem: &str) -> Vec<String> {
        let source = match hint {
            SourceHint::Url(url) => url.clone(),
            SourceHint::Search => format!("ytsearch1:{} {}", artist, title),
        };
        let output = self.staging_dir.join(format!("{}.%(ext)s", stem));

        vec![
            source,
            "-x".to_string(),
            "--audio-format".to_string(),
            self.audio_format.clone(),
            "--audio-quality".to_string(),
            "0".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            "--quiet".to_string(),
        ]
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(
        &self,
        hint: &SourceHint,
        artist: &str,
        title: &str,
    ) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| FetchError::Transient(format!("Cannot create staging dir: {}", e)))?;

        let stem = Uuid::new_v4().to_string();
        let args = self.arguments(hint, artist, title, &stem);

        tracing::debug!(command = %self.command, artist = %artist, title = %title, "Starting download");

        let output = Command::new(&self.command)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Transient(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let produced = self
            .staging_dir
            .join(format!("{}.{}", stem, self.audio_format));
        if !produced.exists() {
            return Err(FetchError::NotFound(format!("{} - {}", artist, title)));
        }

        Ok(produced)
    }
}
