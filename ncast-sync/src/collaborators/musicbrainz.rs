//! MusicBrainz album lookup
//!
//! Searches recordings by artist and title and picks the most canonical
//! album release among the matches. Requests are rate limited to one per
//! second as MusicBrainz requires.

use super::{AlbumLookup, LookupError};
use crate::models::ValidationOutcome;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const RATE_LIMIT_MS: u64 = 1000;
const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Release title keywords marking reissues and alternate versions
const VARIANT_TERMS: &[&str] = &[
    "deluxe",
    "live",
    "remaster",
    "anniversary",
    "expanded",
    "edition",
    "bonus",
    "demo",
    "karaoke",
    "instrumental",
];

/// Recording search response
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MBSearchResponse {
    #[serde(default)]
    pub recordings: Vec<MBRecording>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MBRecording {
    pub title: String,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<MBArtistCredit>,
    #[serde(default)]
    pub releases: Vec<MBRelease>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MBArtistCredit {
    pub name: String,
    #[serde(default)]
    pub joinphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MBRelease {
    pub title: String,
    pub status: Option<String>,
    pub date: Option<String>,
    #[serde(rename = "release-group")]
    pub release_group: Option<MBReleaseGroup>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MBReleaseGroup {
    #[serde(rename = "primary-type")]
    pub primary_type: Option<String>,
    #[serde(rename = "secondary-types", default)]
    pub secondary_types: Vec<String>,
}

impl MBRecording {
    fn artist_name(&self) -> String {
        self.artist_credit
            .iter()
            .map(|c| format!("{}{}", c.name, c.joinphrase.as_deref().unwrap_or("")))
            .collect::<String>()
    }
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Album lookup against the MusicBrainz web service
pub struct MusicBrainzLookup {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
}

impl MusicBrainzLookup {
    pub fn new(contact: Option<&str>, timeout: Duration) -> Result<Self, LookupError> {
        let user_agent = format!(
            "ncast-sync/{} ( {} )",
            env!("CARGO_PKG_VERSION"),
            contact.unwrap_or("https://github.com/neuralcast")
        );
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
        })
    }

    async fn search(&self, artist: &str, title: &str) -> Result<MBSearchResponse, LookupError> {
        self.rate_limiter.wait().await;

        let query = format!(
            "recording:\"{}\" AND artist:\"{}\"",
            escape_term(title),
            escape_term(artist)
        );
        let url = format!("{}/recording", MUSICBRAINZ_BASE_URL);

        tracing::debug!(artist = %artist, title = %title, "Querying MusicBrainz recordings");

        let response = self
            .http_client
            .get(&url)
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "10")])
            .send()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let status = response.status();
        if status == 429 || status == 503 {
            return Err(LookupError::RateLimited);
        }
        if !status.is_success() {
            return Err(LookupError::Transient(format!("HTTP {}", status.as_u16())));
        }

        response
            .json()
            .await
            .map_err(|e| LookupError::Transient(format!("Parse error: {}", e)))
    }
}

#[async_trait]
impl AlbumLookup for MusicBrainzLookup {
    async fn confirm(&self, artist: &str, title: &str) -> Result<ValidationOutcome, LookupError> {
        let response = self.search(artist, title).await?;
        let outcome = pick_album(&response.recordings, artist, title);

        tracing::info!(artist = %artist, title = %title, outcome = ?outcome, "MusicBrainz lookup");
        Ok(outcome)
    }
}

fn escape_term(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

/// Choose the canonical album among recordings matching `artist` and `title`
pub fn pick_album(recordings: &[MBRecording], artist: &str, title: &str) -> ValidationOutcome {
    let matching: Vec<&MBRecording> = recordings
        .iter()
        .filter(|r| {
            similarity(&r.title, title) >= SIMILARITY_THRESHOLD
                && similarity(&r.artist_name(), artist) >= SIMILARITY_THRESHOLD
        })
        .collect();

    if matching.is_empty() {
        return ValidationOutcome::Rejected(format!(
            "no MusicBrainz recording matches '{} - {}'",
            artist, title
        ));
    }

    let best = matching
        .iter()
        .flat_map(|r| r.releases.iter())
        .min_by_key(|release| release_rank(release));

    match best {
        Some(release) => ValidationOutcome::Confirmed(release.title.clone()),
        None => ValidationOutcome::Rejected(format!(
            "no release found for '{} - {}'",
            artist, title
        )),
    }
}

/// Lower ranks are preferred: official, album type, no secondary types,
/// no variant keywords, earliest date
fn release_rank(release: &MBRelease) -> (bool, bool, bool, bool, String) {
    let official = release
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("official"));
    let group = release.release_group.clone().unwrap_or_default();
    let album = group
        .primary_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("album"));
    let lowered = release.title.to_lowercase();
    let variant = VARIANT_TERMS.iter().any(|term| lowered.contains(term));
    let date = release
        .date
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "9999".to_string());

    (!official, !album, !group.secondary_types.is_empty(), variant, date)
}
