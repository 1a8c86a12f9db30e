//! Test helper modules for ncast-sync integration tests
//!
//! - fakes: in-memory Tagger, scripted AlbumLookup, file-writing Fetcher
//! - fixtures: temporary station layouts and tree snapshots

#![allow(dead_code)]

pub mod fakes;
pub mod fixtures;

pub use fakes::{collaborators, FakeFetcher, LookupScript, MemoryTagger, ScriptedLookup};
pub use fixtures::{full_tags, snapshot_tree, test_settings, TestStation, HEADER};
