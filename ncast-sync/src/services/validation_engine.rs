//! Validation Engine
//!
//! Confirms the album of rows whose validation state is unknown through the
//! [`AlbumLookup`] collaborator. Every lookup attempt takes one worker pool
//! slot and failed attempts are retried with backoff; rows whose retries run
//! out stay unknown and are reported instead of being touched.

use crate::collaborators::AlbumLookup;
use crate::error::SyncError;
use crate::models::{IdentityKey, Playlist, ValidationOutcome, ValidationState};
use crate::services::library_inspector::ScanReport;
use crate::services::retry::{retry_transient, RetryFailure, RetryPolicy};
use crate::services::summary::{RowFailure, Stage};
use crate::services::worker_pool::WorkerPool;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A row left unvalidated after exhausting its lookup attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnvalidatedEntry {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub playlist: String,
    pub reason: String,
}

/// Outcome of the validation pass over one playlist
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub confirmed: usize,
    /// Rejected rows with their reason; these rows are deleted
    pub rejections: Vec<RowFailure>,
    pub deferred: Vec<UnvalidatedEntry>,
    pub failures: Vec<RowFailure>,
}

/// Validation behaviour knobs
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub policy: RetryPolicy,
    /// Also validate rows whose file is not in the library yet
    pub validate_missing: bool,
}

/// Indices of rows that need a lookup
pub fn candidates(playlist: &Playlist, library: &ScanReport, validate_missing: bool) -> Vec<usize> {
    playlist
        .songs
        .iter()
        .enumerate()
        .filter(|(_, song)| {
            song.validated == ValidationState::Unknown
                && !song.has_override()
                && (validate_missing || library.find(&song.identity_key()).is_some())
        })
        .map(|(index, _)| index)
        .collect()
}

/// Run lookups for every candidate row and apply the outcomes
pub async fn validate(
    playlist: &mut Playlist,
    library: &ScanReport,
    lookup: &dyn AlbumLookup,
    pool: &WorkerPool,
    options: &ValidationOptions,
    cancel: &CancellationToken,
) -> ValidationReport {
    let work: Vec<(usize, String, String)> = candidates(playlist, library, options.validate_missing)
        .into_iter()
        .map(|index| {
            let song = &playlist.songs[index];
            (index, song.artist.clone(), song.title.clone())
        })
        .collect();

    if work.is_empty() {
        return ValidationReport::default();
    }

    tracing::info!(playlist = %playlist.name, rows = work.len(), "Validating albums");

    let policy = &options.policy;
    let results: Vec<_> = stream::iter(work)
        .map(|(index, artist, title)| async move {
            let result = retry_transient(
                "album lookup",
                policy,
                pool,
                cancel,
                || lookup.confirm(&artist, &title),
                |_| true,
            )
            .await;
            (index, result)
        })
        .buffer_unordered(pool.size())
        .collect()
        .await;

    let mut report = ValidationReport::default();

    for (index, result) in results {
        let song = &mut playlist.songs[index];
        let key: IdentityKey = song.identity_key();

        match result {
            Ok(ValidationOutcome::Confirmed(album)) => {
                tracing::debug!(key = %key, album = %album, "Album confirmed");
                song.album = Some(album);
                song.validated = ValidationState::Confirmed;
                report.confirmed += 1;
            }
            Ok(ValidationOutcome::Rejected(reason)) => {
                tracing::warn!(key = %key, reason = %reason, "Validation rejected row");
                song.validated = ValidationState::Failed;
                report.rejections.push(RowFailure::from_error(
                    key,
                    Stage::Validate,
                    &SyncError::DefinitiveRejection(reason),
                ));
            }
            Err(failure) => {
                let reason = match &failure {
                    RetryFailure::Cancelled => "validation cancelled".to_string(),
                    other => other.to_string(),
                };
                tracing::warn!(key = %key, reason = %reason, "Validation deferred to next run");

                report.failures.push(RowFailure::from_error(
                    key,
                    Stage::Validate,
                    &SyncError::Transient(reason.clone()),
                ));
                report.deferred.push(UnvalidatedEntry {
                    artist: song.artist.clone(),
                    title: song.title.clone(),
                    album: song.album.clone(),
                    playlist: playlist.name.clone(),
                    reason,
                });
            }
        }
    }

    report
}
