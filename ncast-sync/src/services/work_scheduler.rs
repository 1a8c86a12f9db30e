//! Work Scheduler
//!
//! Partitions the reconciled rows of a playlist into satisfied, drift,
//! missing, override and delete classes ([`plan`]), then performs the
//! resulting jobs through the collaborators ([`WorkScheduler::apply`]).
//! Library files whose name is not the canonical `Artist - Title` name of
//! their row are renamed before any other job runs.
//!
//! Jobs are independent: one failing job is reported in its
//! [`JobOutcome`] and never stops the others. Each collaborator call inside a
//! job takes its own worker pool slot.

use crate::collaborators::{Collaborators, FetchError, SourceHint};
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::models::{normalize_year, IdentityKey, Playlist, SongRecord, TagSnapshot, ValidationState};
use crate::services::library_inspector::{canonical_file_name, ScanReport};
use crate::services::override_resolver::OverrideJob;
use crate::services::retry::{retry_transient, RetryFailure};
use crate::services::summary::PlannedActions;
use crate::services::worker_pool::WorkerPool;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Tags a row's library file should carry
///
/// Absent album or year are left as they are on disk. The genre falls back to
/// the playlist name.
pub fn desired_tags(song: &SongRecord, playlist_name: &str) -> TagSnapshot {
    TagSnapshot {
        artist: Some(song.artist.clone()),
        title: Some(song.title.clone()),
        album: song.album.clone(),
        year: song.year.as_deref().and_then(normalize_year),
        genre: Some(
            song.genre
                .clone()
                .unwrap_or_else(|| playlist_name.to_string()),
        ),
    }
}

fn text_differs(desired: &Option<String>, actual: &Option<String>) -> bool {
    match desired {
        Some(want) => actual.as_deref().map(str::trim) != Some(want.trim()),
        None => false,
    }
}

/// Names of the fields whose embedded value differs from the desired one
pub fn tag_differences(desired: &TagSnapshot, actual: &TagSnapshot) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if text_differs(&desired.artist, &actual.artist) {
        fields.push("artist");
    }
    if text_differs(&desired.title, &actual.title) {
        fields.push("title");
    }
    if text_differs(&desired.album, &actual.album) {
        fields.push("album");
    }
    if let Some(year) = &desired.year {
        if actual.year.as_deref().and_then(normalize_year).as_ref() != Some(year) {
            fields.push("year");
        }
    }
    if text_differs(&desired.genre, &actual.genre) {
        fields.push("genre");
    }
    fields
}

/// Rewrite the tags of an existing file
#[derive(Debug, Clone, PartialEq)]
pub struct RetagJob {
    pub key: IdentityKey,
    pub path: PathBuf,
    pub tags: TagSnapshot,
    pub fields: Vec<&'static str>,
}

/// Fetch audio, install it at `target` and tag it
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    pub key: IdentityKey,
    pub artist: String,
    pub title: String,
    pub hint: SourceHint,
    pub target: PathBuf,
    pub tags: TagSnapshot,
    /// Existing file to back up and replace (overrides only)
    pub replace: Option<PathBuf>,
}

/// Move a library file to its row's canonical name
#[derive(Debug, Clone, PartialEq)]
pub struct RenameJob {
    pub key: IdentityKey,
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReason {
    /// Row carried the delete marker
    Marker,
    /// Validation rejected the row
    Rejected,
}

/// Remove a row's files and the row itself
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteJob {
    pub key: IdentityKey,
    pub paths: Vec<PathBuf>,
    pub reason: DeleteReason,
}

/// Partition of a playlist's rows into work classes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkPlan {
    pub satisfied: usize,
    /// Missing rows held back until their album is confirmed
    pub awaiting_validation: usize,
    pub renames: Vec<RenameJob>,
    pub retags: Vec<RetagJob>,
    pub fetches: Vec<FetchJob>,
    pub overrides: Vec<FetchJob>,
    pub deletions: Vec<DeleteJob>,
}

impl WorkPlan {
    pub fn counts(&self) -> PlannedActions {
        PlannedActions {
            rename: self.renames.len(),
            retag: self.retags.len(),
            fetch: self.fetches.len(),
            override_replace: self.overrides.len(),
            delete: self.deletions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

fn files_for(library: &ScanReport, key: &IdentityKey) -> Vec<PathBuf> {
    library
        .files
        .iter()
        .filter(|f| &f.identity_key == key)
        .map(|f| f.path.clone())
        .collect()
}

/// Canonical path for `file` within its folder, if its name differs
fn rename_target(song: &SongRecord, file: &Path) -> Option<PathBuf> {
    let extension = file.extension()?.to_string_lossy();
    let canonical = canonical_file_name(&song.artist, &song.title, &extension);
    if file.file_name()?.to_string_lossy() == canonical.as_str() {
        return None;
    }
    Some(file.with_file_name(canonical))
}

/// Classify every row of `playlist` against the scanned library
pub fn plan(
    playlist: &Playlist,
    library: &ScanReport,
    overrides: Vec<OverrideJob>,
    settings: &SyncSettings,
) -> WorkPlan {
    let mut work = WorkPlan::default();
    let target_for = |artist: &str, title: &str| {
        playlist
            .folder
            .join(canonical_file_name(artist, title, &settings.audio_format))
    };

    for job in &overrides {
        let Some(song) = playlist.position_of(&job.key).map(|i| &playlist.songs[i]) else {
            continue;
        };
        work.overrides.push(FetchJob {
            key: job.key.clone(),
            artist: job.artist.clone(),
            title: job.title.clone(),
            hint: SourceHint::Url(job.url.clone()),
            target: target_for(&job.artist, &job.title),
            tags: desired_tags(song, &playlist.name),
            replace: job.existing.clone(),
        });
    }

    for song in &playlist.songs {
        let key = song.identity_key();
        if overrides.iter().any(|o| o.key == key) {
            continue;
        }

        if song.validated == ValidationState::Failed {
            work.deletions.push(DeleteJob {
                paths: files_for(library, &key),
                key,
                reason: DeleteReason::Rejected,
            });
            continue;
        }

        let tags = desired_tags(song, &playlist.name);
        match library.find(&key) {
            Some(file) => {
                if let Some(to) = rename_target(song, &file.path) {
                    work.renames.push(RenameJob {
                        key: key.clone(),
                        from: file.path.clone(),
                        to,
                    });
                }
                let fields = tag_differences(&tags, &file.tags);
                if fields.is_empty() {
                    work.satisfied += 1;
                } else {
                    work.retags.push(RetagJob {
                        key,
                        path: file.path.clone(),
                        tags,
                        fields,
                    });
                }
            }
            None if song.validated == ValidationState::Confirmed || !settings.validate_missing => {
                work.fetches.push(FetchJob {
                    key,
                    artist: song.artist.clone(),
                    title: song.title.clone(),
                    hint: SourceHint::Search,
                    target: target_for(&song.artist, &song.title),
                    tags,
                    replace: None,
                });
            }
            None => work.awaiting_validation += 1,
        }
    }

    for deletion in &playlist.pending_deletions {
        let key = deletion.row.identity_key();
        if work.deletions.iter().any(|d| d.key == key) {
            continue;
        }
        work.deletions.push(DeleteJob {
            paths: files_for(library, &key),
            key,
            reason: DeleteReason::Marker,
        });
    }

    work
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Rename,
    Retag,
    Fetch,
    Override,
    Delete(DeleteReason),
}

/// Result of one applied job
#[derive(Debug)]
pub struct JobOutcome {
    pub key: IdentityKey,
    pub kind: JobKind,
    pub result: SyncResult<()>,
}

enum Job<'p> {
    Rename(&'p RenameJob),
    /// Retag job and the path its file has after the rename phase
    Retag(&'p RetagJob, &'p Path),
    Fetch(&'p FetchJob),
    Override(&'p FetchJob),
    Delete(&'p DeleteJob),
}

impl Job<'_> {
    fn key(&self) -> &IdentityKey {
        match self {
            Job::Rename(j) => &j.key,
            Job::Retag(j, _) => &j.key,
            Job::Fetch(j) | Job::Override(j) => &j.key,
            Job::Delete(j) => &j.key,
        }
    }

    fn kind(&self) -> JobKind {
        match self {
            Job::Rename(_) => JobKind::Rename,
            Job::Retag(..) => JobKind::Retag,
            Job::Fetch(_) => JobKind::Fetch,
            Job::Override(_) => JobKind::Override,
            Job::Delete(j) => JobKind::Delete(j.reason),
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Executes work plans through the collaborators
#[derive(Clone)]
pub struct WorkScheduler {
    collaborators: Collaborators,
    pool: WorkerPool,
    settings: SyncSettings,
}

impl WorkScheduler {
    pub fn new(collaborators: Collaborators, pool: WorkerPool, settings: SyncSettings) -> Self {
        Self {
            collaborators,
            pool,
            settings,
        }
    }

    /// Run every job of `plan`, at most `pool.size()` at a time.
    ///
    /// Renames run first, so retags address the file under its new name.
    pub async fn apply(&self, plan: &WorkPlan, cancel: &CancellationToken) -> Vec<JobOutcome> {
        let mut outcomes = Vec::with_capacity(plan.counts().total());
        let mut moved: HashMap<&Path, &Path> = HashMap::new();

        for job in &plan.renames {
            let outcome = self.run_job(Job::Rename(job), cancel).await;
            if outcome.result.is_ok() {
                moved.insert(job.from.as_path(), job.to.as_path());
            }
            outcomes.push(outcome);
        }

        let jobs: Vec<Job<'_>> = plan
            .deletions
            .iter()
            .map(Job::Delete)
            .chain(plan.retags.iter().map(|j| {
                let path = moved.get(j.path.as_path()).copied().unwrap_or(j.path.as_path());
                Job::Retag(j, path)
            }))
            .chain(plan.fetches.iter().map(Job::Fetch))
            .chain(plan.overrides.iter().map(Job::Override))
            .collect();

        let rest: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| self.run_job(job, cancel))
            .buffer_unordered(self.pool.size())
            .collect()
            .await;
        outcomes.extend(rest);
        outcomes
    }

    async fn run_job(&self, job: Job<'_>, cancel: &CancellationToken) -> JobOutcome {
        let key = job.key().clone();
        let kind = job.kind();

        let result = if cancel.is_cancelled() {
            Err(SyncError::Cancelled(format!("{} not started", key)))
        } else {
            match job {
                Job::Rename(j) => rename_file(&j.from, &j.to).await,
                Job::Retag(j, path) => self.write_tags(path, &j.tags).await,
                Job::Fetch(j) => self.fetch_and_install(j, cancel).await,
                Job::Override(j) => self.replace(j, cancel).await,
                Job::Delete(j) => delete_files(&j.paths).await,
            }
        };

        match &result {
            Ok(()) => tracing::info!(key = %key, job = ?kind, "Job complete"),
            Err(e) => tracing::warn!(key = %key, job = ?kind, error = %e, "Job failed"),
        }

        JobOutcome { key, kind, result }
    }

    async fn write_tags(&self, path: &Path, tags: &TagSnapshot) -> SyncResult<()> {
        let write = self.collaborators.tagger.write(path, tags);
        let timed = tokio::time::timeout(self.settings.tag_timeout(), write);
        match self.pool.run(timed).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::Tag {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => Err(SyncError::Transient(format!(
                "tag write timed out for {}",
                path.display()
            ))),
        }
    }

    async fn fetch_raw(&self, job: &FetchJob, cancel: &CancellationToken) -> SyncResult<PathBuf> {
        let fetcher = &self.collaborators.fetcher;
        let result = retry_transient(
            "fetch",
            &self.settings.fetch_policy(),
            &self.pool,
            cancel,
            || fetcher.fetch(&job.hint, &job.artist, &job.title),
            FetchError::is_transient,
        )
        .await;

        result.map_err(|failure| match failure {
            RetryFailure::Permanent(FetchError::NotFound(what)) => SyncError::NotFound(what),
            RetryFailure::Permanent(other) => SyncError::Transient(other.to_string()),
            RetryFailure::Cancelled => SyncError::Cancelled(format!("fetch of {}", job.key)),
            exhausted => SyncError::Transient(exhausted.to_string()),
        })
    }

    async fn fetch_and_install(&self, job: &FetchJob, cancel: &CancellationToken) -> SyncResult<()> {
        let raw = self.fetch_raw(job, cancel).await?;
        install(&raw, &job.target).await?;
        self.write_tags(&job.target, &job.tags).await
    }

    /// Replace a row's file from its override source.
    ///
    /// The existing file is renamed to `<file>.bak` first and restored if any
    /// later step fails.
    async fn replace(&self, job: &FetchJob, cancel: &CancellationToken) -> SyncResult<()> {
        let backup = match &job.replace {
            Some(existing) => {
                let bak = backup_path(existing);
                tokio::fs::rename(existing, &bak)
                    .await
                    .map_err(|e| SyncError::io(existing, e))?;
                Some((existing.clone(), bak))
            }
            None => None,
        };

        let result = self.fetch_and_install(job, cancel).await;

        match (result, backup) {
            (Ok(()), Some((_, bak))) => {
                if let Err(e) = tokio::fs::remove_file(&bak).await {
                    tracing::warn!(path = %bak.display(), error = %e, "Failed to remove override backup");
                }
                Ok(())
            }
            (Ok(()), None) => Ok(()),
            (Err(e), backup) => {
                let restores_target = backup
                    .as_ref()
                    .is_some_and(|(existing, _)| existing == &job.target);
                if !restores_target && tokio::fs::metadata(&job.target).await.is_ok() {
                    if let Err(remove_err) = tokio::fs::remove_file(&job.target).await {
                        tracing::warn!(path = %job.target.display(), error = %remove_err, "Failed to remove partial override file");
                    }
                }
                if let Some((existing, bak)) = backup {
                    if let Err(restore_err) = tokio::fs::rename(&bak, &existing).await {
                        tracing::error!(
                            path = %existing.display(),
                            backup = %bak.display(),
                            error = %restore_err,
                            "Failed to restore file after override failure"
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

/// Move a fetched file into place, copying when a rename is not possible
async fn install(raw: &Path, target: &Path) -> SyncResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }

    if tokio::fs::rename(raw, target).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(raw, target)
        .await
        .map_err(|e| SyncError::io(target, e))?;
    if let Err(e) = tokio::fs::remove_file(raw).await {
        tracing::warn!(path = %raw.display(), error = %e, "Failed to remove staged download");
    }
    Ok(())
}

/// Rename `from` to `to` unless another file already holds that name
async fn rename_file(from: &Path, to: &Path) -> SyncResult<()> {
    if tokio::fs::metadata(to).await.is_ok() && !same_file(from, to).await {
        tracing::warn!(from = %from.display(), to = %to.display(), "Rename target already exists");
        return Err(SyncError::io(
            to,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target file already exists"),
        ));
    }

    tokio::fs::rename(from, to)
        .await
        .map_err(|e| SyncError::io(from, e))?;
    tracing::debug!(from = %from.display(), to = %to.display(), "Renamed library file");
    Ok(())
}

/// Whether both paths name one file (a case-only rename on a
/// case-insensitive file system)
async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn delete_files(paths: &[PathBuf]) -> SyncResult<()> {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Deleted library file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::io(path, e)),
        }
    }
    Ok(())
}
