//! ncast-sync - playlist to library reconciliation
//!
//! Reconciles every playlist of one station against its song library, or
//! only reports the intended actions with `--dry-run`.

use anyhow::{Context, Result};
use clap::Parser;
use ncast_common::config::{resolve_stations_root, STATIONS_ROOT_ENV};
use ncast_common::logging::init_tracing;
use ncast_sync::collaborators::{Collaborators, CommandFetcher, LoftyTagger, MusicBrainzLookup};
use ncast_sync::config::load_file_config;
use ncast_sync::models::Station;
use ncast_sync::services::playlist_store;
use ncast_sync::services::store_lock::StationLock;
use ncast_sync::{Reconciler, StationSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ncast-sync", version, about = "Keep station playlists and song library in sync")]
struct Args {
    /// Station to reconcile
    #[arg(short, long, default_value = "NeuralCast", env = "NCAST_STATION")]
    station: String,

    /// Report intended actions without touching files
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Folder containing the station folders
    #[arg(long)]
    stations_root: Option<PathBuf>,

    /// Config file (defaults to <config dir>/neuralcast/ncast-sync.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker pool size, overriding the config file
    #[arg(short, long)]
    workers: Option<usize>,

    /// List the station's playlists and exit
    #[arg(long)]
    list: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Remove the station lock left by an interrupted run before starting
    #[arg(long)]
    force_unlock: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let file_config = load_file_config(args.config.as_deref())?;
    init_tracing(&file_config.common.logging)?;

    let stations_root = resolve_stations_root(
        args.stations_root.as_deref(),
        STATIONS_ROOT_ENV,
        &file_config.common,
    );
    let station = Station::new(&stations_root, &args.station);

    info!("Starting ncast-sync v{}", env!("CARGO_PKG_VERSION"));
    info!(station = %station.name, root = %station.root.display(), dry_run = args.dry_run, "Station selected");

    if args.list {
        return list_playlists(&station, args.json);
    }

    let mut settings = file_config.sync;
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }

    let lookup = MusicBrainzLookup::new(
        settings.musicbrainz_contact.as_deref(),
        Duration::from_secs(settings.lookup_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("Failed to create MusicBrainz client: {}", e))?;

    let collaborators = Collaborators {
        tagger: Arc::new(LoftyTagger::new()),
        lookup: Arc::new(lookup),
        fetcher: Arc::new(CommandFetcher::new(
            settings.fetch_command.clone(),
            settings.audio_format.clone(),
        )),
    };

    if args.force_unlock && StationLock::force_release(&station.lock_path())? {
        warn!(station = %station.name, "Removed existing station lock");
    }

    let run_timeout = settings.run_timeout_secs;
    let reconciler = Reconciler::new(settings, collaborators, args.dry_run)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    if let Some(secs) = run_timeout {
        spawn_run_timeout(cancel.clone(), Duration::from_secs(secs));
    }

    match reconciler.reconcile_station(&station, &cancel).await {
        Ok(summary) => {
            print_summary(&summary, args.json)?;
            if summary.cancelled {
                warn!("Run was cancelled before every playlist finished");
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) => {
            error!(station = %station.name, error = %e, "Station run failed");
            eprintln!("ncast-sync: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight work");
            cancel.cancel();
        }
    });
}

fn spawn_run_timeout(cancel: CancellationToken, limit: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                warn!(limit_secs = limit.as_secs(), "Run timeout reached, cancelling");
                cancel.cancel();
            }
        }
    });
}

fn list_playlists(station: &Station, json: bool) -> Result<ExitCode> {
    let listings = playlist_store::list(station)
        .with_context(|| format!("Cannot list playlists of station {}", station.name))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Playlists for station {}:", station.name);
    for listing in &listings {
        match &listing.error {
            Some(e) => println!("  {} (unreadable: {})", listing.name, e),
            None => println!(
                "  {} ({} songs, {} pending deletions, {} malformed rows)",
                listing.name, listing.songs, listing.pending_deletions, listing.skipped_rows
            ),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &StationSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    for playlist in &summary.playlists {
        println!("{}", playlist.display_string());
        for failure in &playlist.failures {
            println!("    {} failed for {}: {}", failure.stage, failure.key, failure.error);
        }
        for rejection in &playlist.rejections {
            println!("    rejected {}: {}", rejection.key, rejection.error);
        }
    }
    for failed in &summary.failed_playlists {
        println!("{}: FAILED ({})", failed.name, failed.error);
    }
    println!("{}", summary.display_string());
    Ok(())
}
