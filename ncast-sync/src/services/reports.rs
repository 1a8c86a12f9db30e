//! Station-level audit reports
//!
//! - `duplicate_analysis.log`: one line per identity key found more than once
//! - `albums_not_validated.csv`: rows left unvalidated after their retries

use crate::error::{SyncError, SyncResult};
use crate::models::{DuplicateGroup, Station};
use crate::services::validation_engine::UnvalidatedEntry;
use std::collections::HashSet;

pub const UNVALIDATED_COLUMNS: [&str; 5] = ["Artist", "Title", "Album", "Playlist", "Reason"];

/// Drop entries equal (ignoring case) on every column, keeping the first
pub fn dedupe_unvalidated(entries: Vec<UnvalidatedEntry>) -> Vec<UnvalidatedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| {
            seen.insert((
                e.artist.to_lowercase(),
                e.title.to_lowercase(),
                e.album.as_deref().unwrap_or("").to_lowercase(),
                e.playlist.to_lowercase(),
                e.reason.to_lowercase(),
            ))
        })
        .collect()
}

pub fn render_unvalidated(entries: &[UnvalidatedEntry]) -> SyncResult<Vec<u8>> {
    let to_error = |e: csv::Error| {
        SyncError::Common(ncast_common::Error::Internal(format!("Failed to render report: {}", e)))
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(UNVALIDATED_COLUMNS).map_err(to_error)?;
    for entry in entries {
        writer
            .write_record([
                entry.artist.as_str(),
                entry.title.as_str(),
                entry.album.as_deref().unwrap_or(""),
                entry.playlist.as_str(),
                entry.reason.as_str(),
            ])
            .map_err(to_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| {
            SyncError::Common(ncast_common::Error::Internal(format!("Failed to render report: {}", e)))
        })
}

pub fn render_duplicates(station: &str, groups: &[DuplicateGroup]) -> String {
    let occurrences: usize = groups.iter().map(|g| g.occurrences).sum();
    let mut out = format!(
        "Duplicate analysis for station {}\nDuplicate keys: {}\nTotal occurrences: {}\n\n",
        station,
        groups.len(),
        occurrences
    );
    for group in groups {
        out.push_str(&format!(
            "{} -> [{}] ({} occurrences)\n",
            group.key,
            group.playlists.join(", "),
            group.occurrences
        ));
    }
    out
}

/// Write both reports into the station folder
pub fn write_reports(
    station: &Station,
    duplicates: &[DuplicateGroup],
    unvalidated: &[UnvalidatedEntry],
) -> SyncResult<()> {
    ncast_common::fs_util::write_atomic(
        &station.duplicate_report_path(),
        render_duplicates(&station.name, duplicates).as_bytes(),
    )?;
    ncast_common::fs_util::write_atomic(
        &station.unvalidated_report_path(),
        &render_unvalidated(unvalidated)?,
    )?;

    tracing::info!(
        station = %station.name,
        duplicates = duplicates.len(),
        unvalidated = unvalidated.len(),
        "Wrote station reports"
    );
    Ok(())
}
