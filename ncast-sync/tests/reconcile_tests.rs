//! End-to-end station runs against in-memory collaborators

mod helpers;

use helpers::{
    collaborators, full_tags, snapshot_tree, test_settings, FakeFetcher, LookupScript,
    MemoryTagger, ScriptedLookup, TestStation, HEADER,
};
use ncast_sync::collaborators::SourceHint;
use ncast_sync::models::{IdentityKey, TagSnapshot};
use ncast_sync::services::summary::Stage;
use ncast_sync::{Reconciler, StationSummary, SyncError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Harness {
    ts: TestStation,
    tagger: Arc<MemoryTagger>,
    lookup: Arc<ScriptedLookup>,
    fetcher: Arc<FakeFetcher>,
}

impl Harness {
    fn new(station: &str, lookup: ScriptedLookup, fetcher: FakeFetcher) -> Self {
        Self {
            ts: TestStation::new(station),
            tagger: Arc::new(MemoryTagger::new()),
            lookup: Arc::new(lookup),
            fetcher: Arc::new(fetcher),
        }
    }

    fn reconciler(&self, dry_run: bool) -> Reconciler {
        Reconciler::new(
            test_settings(),
            collaborators(&self.tagger, &self.lookup, &self.fetcher),
            dry_run,
        )
        .unwrap()
    }

    async fn run(&self, dry_run: bool) -> StationSummary {
        self.reconciler(dry_run)
            .reconcile_station(&self.ts.station, &CancellationToken::new())
            .await
            .unwrap()
    }
}

fn album_tags(album: &str) -> TagSnapshot {
    TagSnapshot {
        album: Some(album.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_duplicate_rows_collapse_and_embedded_album_confirms() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist(
        "Demo",
        &format!("{HEADER}Artist A,Song X,,,,false,\nArtist A,Song X,,,,false,\n"),
    );
    let song = h
        .ts
        .add_song(&h.tagger, "Demo", "Artist A", "Song X", album_tags("Album Y"));

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(playlist.duplicates_removed, 1);
    assert_eq!(playlist.validated, 1);
    assert_eq!(playlist.retagged, 1);
    assert_eq!(h.lookup.total_calls(), 0, "embedded album should be trusted");

    assert_eq!(
        h.ts.read_playlist("Demo"),
        format!("{HEADER}Artist A,Song X,Album Y,,,true,\n")
    );
    assert_eq!(
        h.tagger.get(&song).unwrap(),
        full_tags("Artist A", "Song X", "Album Y", "Demo")
    );

    assert_eq!(summary.duplicates.len(), 1);
    assert_eq!(summary.duplicates[0].key, IdentityKey::new("Artist A", "Song X"));
    assert_eq!(summary.duplicates[0].occurrences, 2);
    let report = h.ts.read_report(&h.ts.station.duplicate_report_path());
    assert!(report.contains("artist a|song x -> [Demo] (2 occurrences)"));
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist(
        "Rock",
        &format!("{HEADER}Artist A,Song X,,,,false,\nArtist B,Song Y,Album B,2003,,true,\n"),
    );
    h.ts
        .add_song(&h.tagger, "Rock", "Artist A", "Song X", album_tags("Album Y"));

    let first = h.run(false).await;
    assert_eq!(first.playlists[0].downloaded, 1);
    let fetched = h.ts.song_path("Rock", "Artist B", "Song Y");
    assert_eq!(
        std::fs::read_to_string(&fetched).unwrap(),
        "search:Artist B - Song Y"
    );

    let playlists_before = snapshot_tree(&h.ts.station.playlists_dir());
    let library_before = snapshot_tree(&h.ts.station.library_root());

    let second = h.run(false).await;

    let playlist = &second.playlists[0];
    assert_eq!(playlist.planned.total(), 0);
    assert_eq!(playlist.satisfied, 2);
    assert!(!playlist.store_changed);
    assert_eq!(snapshot_tree(&h.ts.station.playlists_dir()), playlists_before);
    assert_eq!(snapshot_tree(&h.ts.station.library_root()), library_before);
    assert_eq!(h.fetcher.calls().len(), 1);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist(
        "Rock",
        &format!(
            "{HEADER}Artist A,Song X,Album A,,,true,\nArtist B,Song Y,Album B,,,true,\nArtist C,[DEL] Song Z,,,,false,\n"
        ),
    );
    h.ts
        .add_song(&h.tagger, "Rock", "Artist A", "Song X", TagSnapshot::default());
    h.ts
        .add_song(&h.tagger, "Rock", "Artist C", "Song Z", TagSnapshot::default());

    let before = snapshot_tree(&h.ts.station.root);
    let summary = h.run(true).await;

    assert!(summary.dry_run);
    let planned = summary.playlists[0].planned;
    assert_eq!(planned.retag, 1);
    assert_eq!(planned.fetch, 1);
    assert_eq!(planned.delete, 1);
    assert_eq!(summary.playlists[0].downloaded, 0);

    assert_eq!(snapshot_tree(&h.ts.station.root), before);
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.tagger.write_count(), 0);
    assert!(!h.ts.station.duplicate_report_path().exists());
    assert!(!h.ts.station.lock_path().exists());
}

#[tokio::test]
async fn test_delete_marker_removes_file_and_row() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist(
        "Rock",
        &format!(
            "{HEADER}Artist A,Song X,Album A,,Rock,true,\nArtist B,Song Z,,,,false,\nArtist B,[DEL] Song Z,,,,false,\n"
        ),
    );
    h.ts.add_song(
        &h.tagger,
        "Rock",
        "Artist A",
        "Song X",
        full_tags("Artist A", "Song X", "Album A", "Rock"),
    );
    let doomed = h
        .ts
        .add_song(&h.tagger, "Rock", "Artist B", "Song Z", TagSnapshot::default());

    let summary = h.run(false).await;

    assert!(!doomed.exists());
    assert_eq!(summary.playlists[0].deleted, 1);
    assert_eq!(summary.playlists[0].backfilled, 0);
    assert_eq!(h.lookup.calls_for("Artist B", "Song Z"), 0);
    let expected = format!("{HEADER}Artist A,Song X,Album A,,Rock,true,\n");
    assert_eq!(h.ts.read_playlist("Rock"), expected);

    let again = h.run(false).await;
    assert_eq!(again.playlists[0].backfilled, 0);
    assert_eq!(h.ts.read_playlist("Rock"), expected);
}

#[tokio::test]
async fn test_override_bypasses_lookup_and_replaces_file() {
    let lookup = ScriptedLookup::new().script(
        "Artist C",
        "Song O",
        LookupScript::Reject("should not be asked".to_string()),
    );
    let h = Harness::new("Demo", lookup, FakeFetcher::new());
    h.ts.write_playlist(
        "Rock",
        &format!("{HEADER}Artist C,Song O,Album O,,,failed,https://example.com/o\n"),
    );
    let existing = h
        .ts
        .add_song(&h.tagger, "Rock", "Artist C", "Song O", album_tags("Old"));

    let summary = h.run(false).await;

    assert_eq!(h.lookup.calls_for("Artist C", "Song O"), 0);
    assert_eq!(
        h.fetcher.calls(),
        vec![(
            SourceHint::Url("https://example.com/o".to_string()),
            IdentityKey::new("Artist C", "Song O")
        )]
    );
    assert_eq!(summary.playlists[0].overrides_applied, 1);
    assert_eq!(
        std::fs::read_to_string(&existing).unwrap(),
        "url:https://example.com/o"
    );
    assert!(!existing.with_extension("mp3.bak").exists());
    assert_eq!(
        h.tagger.get(&existing).unwrap(),
        full_tags("Artist C", "Song O", "Album O", "Rock")
    );
    assert_eq!(
        h.ts.read_playlist("Rock"),
        format!("{HEADER}Artist C,Song O,Album O,,,true,\n")
    );
}

#[tokio::test]
async fn test_rejected_row_is_deleted_with_its_file() {
    let lookup = ScriptedLookup::new().script(
        "Artist D",
        "Song R",
        LookupScript::Reject("no release found".to_string()),
    );
    let h = Harness::new("Demo", lookup, FakeFetcher::new());
    h.ts.write_playlist("Rock", &format!("{HEADER}Artist D,Song R,,,,false,\n"));
    let file = h
        .ts
        .add_song(&h.tagger, "Rock", "Artist D", "Song R", TagSnapshot::default());

    let summary = h.run(false).await;

    assert_eq!(summary.playlists[0].rejected, 1);
    assert_eq!(summary.playlists[0].deleted, 1);
    let rejection = &summary.playlists[0].rejections[0];
    assert_eq!(rejection.key, IdentityKey::new("Artist D", "Song R"));
    assert!(rejection.error.contains("no release found"));
    assert!(!rejection.transient);
    assert!(!file.exists());
    assert_eq!(h.ts.read_playlist("Rock"), HEADER);

    h.run(false).await;
    assert_eq!(h.lookup.calls_for("Artist D", "Song R"), 1);
    assert_eq!(h.ts.read_playlist("Rock"), HEADER);
}

#[tokio::test]
async fn test_transient_lookup_failures_are_deferred_and_reported() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    let content = format!("{HEADER}Artist E,Song T,Album T,,,false,\n");
    h.ts.write_playlist("Rock", &content);

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(h.lookup.calls_for("Artist E", "Song T"), 2);
    assert_eq!(playlist.deferred, 1);
    assert_eq!(playlist.awaiting_validation, 1);
    assert_eq!(playlist.failures.len(), 1);
    assert_eq!(playlist.failures[0].stage, Stage::Validate);
    assert!(playlist.failures[0].transient);
    assert!(h.fetcher.calls().is_empty());

    assert_eq!(h.ts.read_playlist("Rock"), content);
    assert_eq!(summary.unvalidated.len(), 1);
    let report = h.ts.read_report(&h.ts.station.unvalidated_report_path());
    assert!(report.starts_with("Artist,Title,Album,Playlist,Reason\n"));
    assert!(report.contains("Artist E,Song T,Album T,Rock,"));
}

#[tokio::test]
async fn test_held_lock_rejects_second_run() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    let content = format!("{HEADER}Artist A,Song X,,,,false,\n");
    h.ts.write_playlist("Rock", &content);
    std::fs::write(h.ts.station.lock_path(), "pid 1").unwrap();

    let result = h
        .reconciler(false)
        .reconcile_station(&h.ts.station, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::ConcurrencyConflict(_))));
    assert!(h.ts.station.lock_path().exists());
    assert_eq!(h.ts.read_playlist("Rock"), content);
}

#[tokio::test]
async fn test_fetch_failure_does_not_stop_other_rows() {
    let fetcher = FakeFetcher::new().not_found("Artist F", "Song 1");
    let h = Harness::new("Demo", ScriptedLookup::new(), fetcher);
    let content = format!("{HEADER}Artist F,Song 1,Album 1,,,true,\nArtist F,Song 2,Album 2,,,true,\n");
    h.ts.write_playlist("Rock", &content);

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(playlist.downloaded, 1);
    assert_eq!(playlist.failures.len(), 1);
    assert_eq!(playlist.failures[0].stage, Stage::Fetch);
    assert_eq!(playlist.failures[0].key, IdentityKey::new("Artist F", "Song 1"));
    assert!(!h.ts.song_path("Rock", "Artist F", "Song 1").exists());
    assert!(h.ts.song_path("Rock", "Artist F", "Song 2").exists());
    assert_eq!(h.ts.read_playlist("Rock"), content);
}

#[tokio::test]
async fn test_unreadable_playlist_does_not_stop_station() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist("Broken", "Artist,Album\nA,B\n");
    h.ts.write_playlist("Rock", &format!("{HEADER}Artist A,Song X,Album A,,,true,\n"));

    let summary = h.run(false).await;

    assert_eq!(summary.failed_playlists.len(), 1);
    assert_eq!(summary.failed_playlists[0].name, "Broken");
    assert_eq!(summary.playlists.len(), 1);
    assert_eq!(summary.playlists[0].name, "Rock");
    assert_eq!(summary.playlists[0].downloaded, 1);
}

#[tokio::test]
async fn test_row_order_kept_and_backfill_appended() {
    let lookup = ScriptedLookup::new().script(
        "Band Z",
        "Extra",
        LookupScript::Confirm("Album Z".to_string()),
    );
    let h = Harness::new("Demo", lookup, FakeFetcher::new());
    h.ts.write_playlist(
        "Rock",
        "Artist,Title,Album,Year,Genre,Validated,OverrideUrl,Notes\n\
         Band B,Second,Album B,,Rock,true,,keep me\n\
         Band A,First,Album A,,Rock,true,,\n",
    );
    h.ts.add_song(
        &h.tagger,
        "Rock",
        "Band B",
        "Second",
        full_tags("Band B", "Second", "Album B", "Rock"),
    );
    h.ts.add_song(
        &h.tagger,
        "Rock",
        "Band A",
        "First",
        full_tags("Band A", "First", "Album A", "Rock"),
    );
    h.ts
        .add_song(&h.tagger, "Rock", "Band Z", "Extra", album_tags("Album Z"));

    let summary = h.run(false).await;

    assert_eq!(summary.playlists[0].backfilled, 1);
    assert_eq!(
        h.ts.read_playlist("Rock"),
        "Artist,Title,Album,Year,Genre,Validated,OverrideUrl,Notes\n\
         Band B,Second,Album B,,Rock,true,,keep me\n\
         Band A,First,Album A,,Rock,true,,\n\
         Band Z,Extra,Album Z,,,true,,\n"
    );
}

#[tokio::test]
async fn test_cross_playlist_duplicates_are_only_reported() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    let row = format!("{HEADER}Shared,Song,Album S,,,true,\n");
    h.ts.write_playlist("A", &row);
    h.ts.write_playlist("B", &row);

    let summary = h.run(false).await;

    assert_eq!(summary.duplicates.len(), 1);
    assert_eq!(summary.duplicates[0].playlists, vec!["A", "B"]);
    assert!(h.ts.read_playlist("A").contains("Shared,Song"));
    assert!(h.ts.read_playlist("B").contains("Shared,Song"));
    let report = h.ts.read_report(&h.ts.station.duplicate_report_path());
    assert!(report.contains("shared|song -> [A, B] (2 occurrences)"));
}

#[tokio::test]
async fn test_cancelled_run_leaves_playlists_unsaved() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    let content = format!("{HEADER}Artist A,Song X,Album A,,,true,\n");
    h.ts.write_playlist("Rock", &content);
    h.ts
        .add_song(&h.tagger, "Rock", "Band Z", "Extra", TagSnapshot::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = h
        .reconciler(false)
        .reconcile_station(&h.ts.station, &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.playlists.is_empty());
    assert_eq!(summary.failed_playlists.len(), 1);
    assert_eq!(h.ts.read_playlist("Rock"), content);
    assert!(h.fetcher.calls().is_empty());
    assert!(!h.ts.station.duplicate_report_path().exists());
    assert!(!h.ts.station.unvalidated_report_path().exists());
}

#[tokio::test]
async fn test_artist_containing_separator_is_linked_after_fetch() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    let content =
        format!("{HEADER}Sergio Mendes - Brasil 66,Mas Que Nada,Herb Alpert Presents,,,true,\n");
    h.ts.write_playlist("Rock", &content);

    let first = h.run(false).await;
    assert_eq!(first.playlists[0].downloaded, 1);
    assert!(h
        .ts
        .song_path("Rock", "Sergio Mendes - Brasil 66", "Mas Que Nada")
        .exists());

    let second = h.run(false).await;

    let playlist = &second.playlists[0];
    assert_eq!(playlist.planned.total(), 0);
    assert_eq!(playlist.satisfied, 1);
    assert_eq!(playlist.backfilled, 0);
    assert_eq!(h.fetcher.calls().len(), 1);
    assert_eq!(h.ts.read_playlist("Rock"), content);
}

#[tokio::test]
async fn test_unreadable_tags_are_reported_as_row_failures() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist("Rock", &format!("{HEADER}Artist A,Song X,Album A,,,true,\n"));
    let song = h
        .ts
        .add_song(&h.tagger, "Rock", "Artist A", "Song X", TagSnapshot::default());
    h.tagger.fail_reads(&song);

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(playlist.failures.len(), 1);
    let failure = &playlist.failures[0];
    assert_eq!(failure.stage, Stage::Scan);
    assert_eq!(failure.key, IdentityKey::new("Artist A", "Song X"));
    assert!(failure.error.contains("corrupt tag header"));
    assert!(!failure.transient);
    assert_eq!(playlist.downloaded, 0);
    assert_eq!(summary.totals.row_failures, 1);
}

#[tokio::test]
async fn test_failed_override_restores_original_file() {
    let fetcher = FakeFetcher::new().not_found("Artist C", "Song O");
    let h = Harness::new("Demo", ScriptedLookup::new(), fetcher);
    h.ts.write_playlist(
        "Rock",
        &format!("{HEADER}Artist C,Song O,Album O,,,failed,https://example.com/o\n"),
    );
    let existing = h
        .ts
        .add_song(&h.tagger, "Rock", "Artist C", "Song O", album_tags("Old"));

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(playlist.overrides_applied, 0);
    assert_eq!(playlist.pending_overrides, 1);
    assert_eq!(playlist.failures.len(), 1);
    assert_eq!(playlist.failures[0].stage, Stage::Override);
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "original audio");
    assert!(!existing.with_extension("mp3.bak").exists());
    assert_eq!(h.tagger.get(&existing).unwrap(), album_tags("Old"));
    assert_eq!(
        h.ts.read_playlist("Rock"),
        format!("{HEADER}Artist C,Song O,Album O,,,true,https://example.com/o\n")
    );
}

#[tokio::test]
async fn test_backfilled_file_is_renamed_to_canonical_name() {
    let lookup = ScriptedLookup::new().script(
        "Artist Q",
        "Song Q",
        LookupScript::Confirm("Album Q".to_string()),
    );
    let h = Harness::new("Demo", lookup, FakeFetcher::new());
    h.ts.write_playlist("Rock", HEADER);
    let folder = h.ts.station.playlist_folder("Rock");
    std::fs::create_dir_all(&folder).unwrap();
    let odd = folder.join("track01.mp3");
    std::fs::write(&odd, b"original audio").unwrap();
    h.tagger
        .set(&odd, full_tags("Artist Q", "Song Q", "Album Q", "Rock"));

    let dry = h.run(true).await;
    assert_eq!(dry.playlists[0].planned.rename, 1);
    assert!(odd.exists());

    let summary = h.run(false).await;

    let playlist = &summary.playlists[0];
    assert_eq!(playlist.backfilled, 1);
    assert_eq!(playlist.renamed, 1);
    assert!(playlist.failures.is_empty());
    let canonical = h.ts.song_path("Rock", "Artist Q", "Song Q");
    assert!(!odd.exists());
    assert_eq!(std::fs::read_to_string(&canonical).unwrap(), "original audio");
    assert_eq!(
        h.ts.read_playlist("Rock"),
        format!("{HEADER}Artist Q,Song Q,Album Q,,,true,\n")
    );

    let again = h.run(false).await;
    assert_eq!(again.playlists[0].planned.rename, 0);
    assert_eq!(again.playlists[0].backfilled, 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stale_lock_from_exited_run_is_taken_over() {
    let h = Harness::new("Demo", ScriptedLookup::new(), FakeFetcher::new());
    h.ts.write_playlist("Rock", &format!("{HEADER}Artist A,Song X,Album A,,,true,\n"));
    std::fs::write(
        h.ts.station.lock_path(),
        format!("pid={} started=2026-01-01T00:00:00+00:00\n", u32::MAX),
    )
    .unwrap();

    let summary = h.run(false).await;

    assert_eq!(summary.playlists[0].downloaded, 1);
    assert!(!h.ts.station.lock_path().exists());
}
