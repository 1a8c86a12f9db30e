//! External collaborator interfaces
//!
//! The engine reaches tag I/O, album lookup and audio fetching only through
//! these traits. Production implementations live in the submodules; tests
//! provide in-memory fakes.

pub mod command_fetcher;
pub mod lofty_tagger;
pub mod musicbrainz;

use crate::models::{TagSnapshot, ValidationOutcome};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use command_fetcher::CommandFetcher;
pub use lofty_tagger::LoftyTagger;
pub use musicbrainz::MusicBrainzLookup;

/// Tag read/write errors
#[derive(Debug, Error)]
pub enum TagError {
    #[error("Tag I/O error: {0}")]
    Io(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Album lookup errors; every variant is retryable
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Lookup failed: {0}")]
    Transient(String),

    #[error("Rate limited by lookup service")]
    RateLimited,
}

/// Fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Source has nothing for this song; retrying will not help
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Where the fetcher should obtain audio from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHint {
    /// Search the provider by artist and title
    Search,
    /// Explicit source pointer from a row override
    Url(String),
}

/// Embedded tag reader/writer
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn read(&self, path: &Path) -> Result<TagSnapshot, TagError>;

    /// Write the `Some` fields of `tags`; `None` fields are left untouched
    async fn write(&self, path: &Path, tags: &TagSnapshot) -> Result<(), TagError>;
}

/// External album metadata lookup
#[async_trait]
pub trait AlbumLookup: Send + Sync {
    async fn confirm(&self, artist: &str, title: &str) -> Result<ValidationOutcome, LookupError>;
}

/// Audio source provider
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download audio and return the path of the raw file
    async fn fetch(&self, hint: &SourceHint, artist: &str, title: &str)
        -> Result<PathBuf, FetchError>;
}

/// The set of collaborators used by one reconciler
#[derive(Clone)]
pub struct Collaborators {
    pub tagger: Arc<dyn Tagger>,
    pub lookup: Arc<dyn AlbumLookup>,
    pub fetcher: Arc<dyn Fetcher>,
}
