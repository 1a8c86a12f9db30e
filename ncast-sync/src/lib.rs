//! ncast-sync library
//!
//! Keeps a station's declarative playlists (one CSV per playlist) consistent
//! with its on-disk song library: parses playlists, scans audio folders,
//! deduplicates rows, validates albums, honours manual overrides, schedules
//! fetch/retag/delete work and writes audit reports. Supports dry runs.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::{SyncError, SyncResult};
pub use services::{Reconciler, StationSummary};
