//! Reconciliation engine components

pub mod deduplicator;
pub mod library_inspector;
pub mod override_resolver;
pub mod playlist_store;
pub mod reconciler;
pub mod reports;
pub mod retry;
pub mod store_lock;
pub mod summary;
pub mod validation_engine;
pub mod work_scheduler;
pub mod worker_pool;

pub use reconciler::{PlaylistRun, Reconciler};
pub use summary::{PlaylistSummary, StationSummary};
