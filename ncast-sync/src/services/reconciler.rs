//! Reconciler
//!
//! Drives one station run: for every playlist, load → scan → link tags →
//! backfill → dedupe → validate → resolve overrides → plan → rename → apply →
//! save, then writes the station reports.
//!
//! Each playlist owns its rows exclusively; the only cross-playlist state is
//! the duplicate and unvalidated accumulation, which every playlist returns by
//! value and the station run merges in playlist order.

use crate::collaborators::Collaborators;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::models::{IdentityKey, Playlist, Station, ValidationState};
use crate::services::deduplicator::{dedupe, DuplicateAnalysis};
use crate::services::library_inspector;
use crate::services::override_resolver::resolve_overrides;
use crate::services::playlist_store;
use crate::services::reports;
use crate::services::store_lock::StationLock;
use crate::services::summary::{PlaylistFailure, PlaylistSummary, RowFailure, Stage, StationSummary};
use crate::services::validation_engine::{self, UnvalidatedEntry, ValidationOptions};
use crate::services::work_scheduler::{self, DeleteReason, JobKind, JobOutcome, WorkScheduler};
use crate::services::worker_pool::WorkerPool;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Everything one playlist contributes to the station run
#[derive(Debug)]
pub struct PlaylistRun {
    pub summary: PlaylistSummary,
    pub analysis: DuplicateAnalysis,
    pub unvalidated: Vec<UnvalidatedEntry>,
}

/// Station reconciliation engine
pub struct Reconciler {
    settings: SyncSettings,
    collaborators: Collaborators,
    pool: WorkerPool,
    scheduler: WorkScheduler,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(settings: SyncSettings, collaborators: Collaborators, dry_run: bool) -> SyncResult<Self> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.workers);
        let scheduler = WorkScheduler::new(collaborators.clone(), pool.clone(), settings.clone());

        Ok(Self {
            settings,
            collaborators,
            pool,
            scheduler,
            dry_run,
        })
    }

    /// Reconcile every playlist of `station`.
    ///
    /// Fails only for station-level problems: missing playlists folder, a lock
    /// held by another run, or report files that cannot be written.
    pub async fn reconcile_station(
        &self,
        station: &Station,
        cancel: &CancellationToken,
    ) -> SyncResult<StationSummary> {
        let playlist_paths = station.discover_playlists()?;
        let _lock = StationLock::acquire(&station.lock_path())?;

        tracing::info!(
            station = %station.name,
            playlists = playlist_paths.len(),
            dry_run = self.dry_run,
            workers = self.pool.size(),
            "Starting station run"
        );

        let mut summary = StationSummary::new(&station.name, self.dry_run);

        let runs: Vec<(PathBuf, SyncResult<PlaylistRun>)> = stream::iter(playlist_paths)
            .map(|path| async move {
                let result = self.reconcile_playlist(station, &path, cancel).await;
                (path, result)
            })
            .buffered(self.settings.playlist_concurrency)
            .collect()
            .await;

        let mut analysis = DuplicateAnalysis::new();
        let mut unvalidated = Vec::new();

        for (path, result) in runs {
            match result {
                Ok(run) => {
                    tracing::info!("{}", run.summary.display_string());
                    analysis.merge(run.analysis);
                    unvalidated.extend(run.unvalidated);
                    summary.playlists.push(run.summary);
                }
                Err(e) => {
                    let name = playlist_name(&path);
                    tracing::error!(playlist = %name, error = %e, "Playlist not reconciled");
                    summary.failed_playlists.push(PlaylistFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.cancelled = cancel.is_cancelled();
        summary.duplicates = analysis.groups();
        summary.unvalidated = reports::dedupe_unvalidated(unvalidated);

        if !self.dry_run && !summary.cancelled {
            reports::write_reports(station, &summary.duplicates, &summary.unvalidated)?;
        }

        summary.finish();
        tracing::info!("{}", summary.display_string());
        Ok(summary)
    }

    /// Reconcile a single playlist file.
    ///
    /// The playlist file is only saved once every stage has finished; a
    /// cancelled run returns `Cancelled` and leaves it untouched.
    pub async fn reconcile_playlist(
        &self,
        station: &Station,
        path: &Path,
        cancel: &CancellationToken,
    ) -> SyncResult<PlaylistRun> {
        let name = playlist_name(path);
        let folder = station.playlist_folder(&name);

        let (mut playlist, skipped) = playlist_store::load(path, folder.clone())?;
        let mut summary = PlaylistSummary::new(&name, self.dry_run);
        summary.rows_loaded = playlist.songs.len() + playlist.pending_deletions.len();
        summary.skipped_rows = skipped;

        if !self.dry_run {
            std::fs::create_dir_all(&folder).map_err(|e| SyncError::io(&folder, e))?;
        }

        let pending_keys: HashSet<IdentityKey> = playlist
            .pending_deletions
            .iter()
            .map(|d| d.row.identity_key())
            .collect();
        let declared: HashSet<IdentityKey> = playlist
            .songs
            .iter()
            .map(|s| s.identity_key())
            .chain(pending_keys.iter().cloned())
            .collect();

        let library = library_inspector::scan(
            &folder,
            &declared,
            self.collaborators.tagger.as_ref(),
            &self.pool,
            self.settings.tag_timeout(),
        )
        .await?;
        summary.unrecognized_files = library.unrecognized.clone();
        for failed in &library.tag_errors {
            if let Some(key) = &failed.key {
                summary
                    .failures
                    .push(RowFailure::from_error(key.clone(), Stage::Scan, &failed.error));
            }
        }

        // A delete marker beats a live row for the same song
        playlist
            .songs
            .retain(|s| !pending_keys.contains(&s.identity_key()));

        summary.validated += library_inspector::link_tags(
            &mut playlist,
            &library,
            self.settings.trust_embedded_album,
        );
        summary.backfilled = library_inspector::backfill(&mut playlist, &library, &pending_keys);

        let mut analysis = DuplicateAnalysis::new();
        analysis.record_playlist(&playlist);
        let duplicate_groups = dedupe(&mut playlist);
        summary.duplicates_removed = duplicate_groups.iter().map(|g| g.occurrences - 1).sum();

        let options = ValidationOptions {
            policy: self.settings.lookup_policy(),
            validate_missing: self.settings.validate_missing,
        };
        let validation = validation_engine::validate(
            &mut playlist,
            &library,
            self.collaborators.lookup.as_ref(),
            &self.pool,
            &options,
            cancel,
        )
        .await;
        summary.validated += validation.confirmed;
        summary.rejected = validation.rejections.len();
        summary.rejections = validation.rejections;
        summary.deferred = validation.deferred.len();
        summary.failures.extend(validation.failures);

        let overrides = resolve_overrides(&mut playlist, &library);
        let plan = work_scheduler::plan(&playlist, &library, overrides, &self.settings);
        summary.planned = plan.counts();
        summary.satisfied = plan.satisfied;
        summary.awaiting_validation = plan.awaiting_validation;
        summary.pending_overrides = plan.overrides.len();

        if !self.dry_run && !plan.is_empty() {
            let outcomes = self.scheduler.apply(&plan, cancel).await;
            apply_outcomes(&mut playlist, &mut summary, outcomes);
        }

        if cancel.is_cancelled() {
            tracing::warn!(playlist = %name, "Run cancelled, playlist left unsaved");
            return Err(SyncError::Cancelled(format!("playlist {} not saved", name)));
        }

        summary.store_changed = if self.dry_run {
            would_change(&playlist)?
        } else {
            playlist_store::save(&playlist)?
        };

        Ok(PlaylistRun {
            summary,
            analysis,
            unvalidated: validation.deferred,
        })
    }
}

fn playlist_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn would_change(playlist: &Playlist) -> SyncResult<bool> {
    let rendered = playlist_store::render(playlist)?;
    let existing = std::fs::read(&playlist.source_path)
        .map_err(|e| SyncError::io(&playlist.source_path, e))?;
    Ok(rendered != existing)
}

/// Fold job results back into the rows and the summary
fn apply_outcomes(playlist: &mut Playlist, summary: &mut PlaylistSummary, outcomes: Vec<JobOutcome>) {
    for outcome in outcomes {
        let stage = match outcome.kind {
            JobKind::Rename => Stage::Rename,
            JobKind::Retag => Stage::Retag,
            JobKind::Fetch => Stage::Fetch,
            JobKind::Override => Stage::Override,
            JobKind::Delete(_) => Stage::Delete,
        };

        if let Err(e) = &outcome.result {
            summary
                .failures
                .push(RowFailure::from_error(outcome.key.clone(), stage, e));
            continue;
        }

        match outcome.kind {
            JobKind::Rename => summary.renamed += 1,
            JobKind::Retag => summary.retagged += 1,
            JobKind::Fetch => summary.downloaded += 1,
            JobKind::Override => {
                if let Some(index) = playlist.position_of(&outcome.key) {
                    let song = &mut playlist.songs[index];
                    song.override_source = None;
                    song.validated = ValidationState::Confirmed;
                }
                summary.overrides_applied += 1;
                summary.pending_overrides = summary.pending_overrides.saturating_sub(1);
            }
            JobKind::Delete(DeleteReason::Marker) => {
                playlist
                    .pending_deletions
                    .retain(|d| d.row.identity_key() != outcome.key);
                summary.deleted += 1;
            }
            JobKind::Delete(DeleteReason::Rejected) => {
                playlist.songs.retain(|s| s.identity_key() != outcome.key);
                summary.deleted += 1;
            }
        }
    }
}
