//! Run summaries
//!
//! Structured results of a reconciliation run, independent of how the CLI
//! prints them.

use crate::error::{RowFormatError, SyncError};
use crate::models::{DuplicateGroup, IdentityKey};
use crate::services::validation_engine::UnvalidatedEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stage a row failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    Validate,
    Fetch,
    Retag,
    Override,
    Rename,
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scan => "scan",
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Retag => "retag",
            Stage::Override => "override",
            Stage::Rename => "rename",
            Stage::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A row-level failure; the row stays as it was for the next run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub key: IdentityKey,
    pub stage: Stage,
    pub error: String,
    pub transient: bool,
}

impl RowFailure {
    pub fn from_error(key: IdentityKey, stage: Stage, error: &SyncError) -> Self {
        Self {
            key,
            stage,
            error: error.to_string(),
            transient: error.is_transient(),
        }
    }
}

/// Actions the work scheduler intends to perform for a playlist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlannedActions {
    pub rename: usize,
    pub retag: usize,
    pub fetch: usize,
    pub override_replace: usize,
    pub delete: usize,
}

impl PlannedActions {
    pub fn total(&self) -> usize {
        self.rename + self.retag + self.fetch + self.override_replace + self.delete
    }
}

/// Result of reconciling one playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaylistSummary {
    pub name: String,
    pub dry_run: bool,
    pub rows_loaded: usize,
    pub skipped_rows: Vec<RowFormatError>,
    pub unrecognized_files: Vec<PathBuf>,
    pub backfilled: usize,
    pub duplicates_removed: usize,
    pub validated: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub downloaded: usize,
    pub renamed: usize,
    pub retagged: usize,
    pub deleted: usize,
    pub overrides_applied: usize,
    pub pending_overrides: usize,
    pub satisfied: usize,
    /// Missing rows not fetched because their album is not confirmed yet
    pub awaiting_validation: usize,
    pub planned: PlannedActions,
    /// Whether the playlist file was (or in a dry run would be) rewritten
    pub store_changed: bool,
    pub failures: Vec<RowFailure>,
    /// Rows deleted (or to be deleted) because validation rejected them
    pub rejections: Vec<RowFailure>,
}

impl PlaylistSummary {
    pub fn new(name: &str, dry_run: bool) -> Self {
        Self {
            name: name.to_string(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}: {} rows, {} backfilled, {} duplicates removed, {} validated, {} rejected, \
             {} deferred, {} downloaded, {} renamed, {} retagged, {} deleted, {} pending overrides, \
             {} failures{}",
            self.name,
            self.rows_loaded,
            self.backfilled,
            self.duplicates_removed,
            self.validated,
            self.rejected,
            self.deferred,
            self.downloaded,
            self.renamed,
            self.retagged,
            self.deleted,
            self.pending_overrides,
            self.failures.len(),
            if self.dry_run {
                format!(" (dry run, {} actions planned)", self.planned.total())
            } else {
                String::new()
            }
        )
    }
}

/// A playlist that could not be reconciled at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistFailure {
    pub name: String,
    pub error: String,
}

/// Counts aggregated over every reconciled playlist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StationTotals {
    pub playlists: usize,
    pub failed_playlists: usize,
    pub validated: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub downloaded: usize,
    pub retagged: usize,
    pub deleted: usize,
    pub row_failures: usize,
}

/// Result of a station run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSummary {
    pub station: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub playlists: Vec<PlaylistSummary>,
    pub failed_playlists: Vec<PlaylistFailure>,
    pub duplicates: Vec<DuplicateGroup>,
    pub unvalidated: Vec<UnvalidatedEntry>,
    pub cancelled: bool,
    pub totals: StationTotals,
}

impl StationSummary {
    pub fn new(station: &str, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            station: station.to_string(),
            dry_run,
            started_at: now,
            finished_at: now,
            playlists: Vec::new(),
            failed_playlists: Vec::new(),
            duplicates: Vec::new(),
            unvalidated: Vec::new(),
            cancelled: false,
            totals: StationTotals::default(),
        }
    }

    /// Stamp the finish time and compute totals
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();

        let mut totals = StationTotals {
            playlists: self.playlists.len(),
            failed_playlists: self.failed_playlists.len(),
            ..Default::default()
        };
        for playlist in &self.playlists {
            totals.validated += playlist.validated;
            totals.rejected += playlist.rejected;
            totals.deferred += playlist.deferred;
            totals.downloaded += playlist.downloaded;
            totals.retagged += playlist.retagged;
            totals.deleted += playlist.deleted;
            totals.row_failures += playlist.failures.len();
        }
        self.totals = totals;
    }

    pub fn display_string(&self) -> String {
        let t = &self.totals;
        format!(
            "Station {}{}: {} playlists ({} failed), {} validated, {} rejected, {} deferred, \
             {} downloaded, {} retagged, {} deleted, {} row failures, {} duplicate keys{}",
            self.station,
            if self.dry_run { " [dry run]" } else { "" },
            t.playlists,
            t.failed_playlists,
            t.validated,
            t.rejected,
            t.deferred,
            t.downloaded,
            t.retagged,
            t.deleted,
            t.row_failures,
            self.duplicates.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}
