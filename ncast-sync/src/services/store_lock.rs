//! Advisory lock giving one run exclusive ownership of a station
//!
//! The lock file records the owning process as `pid=<pid> started=<time>`.
//! A lock whose process no longer exists is stale and is taken over.

use crate::error::{SyncError, SyncResult};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Lock file held for the duration of a station run; removed on drop
#[derive(Debug)]
pub struct StationLock {
    path: PathBuf,
}

impl StationLock {
    /// Create the lock file, failing with `ConcurrencyConflict` if a live run
    /// holds it
    pub fn acquire(path: &Path) -> SyncResult<Self> {
        let mut file = match create(path)? {
            Some(file) => file,
            None => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                if !is_stale(&holder) {
                    return Err(conflict(path, &holder));
                }

                tracing::warn!(
                    path = %path.display(),
                    holder = %holder.trim(),
                    "Removing stale station lock"
                );
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(SyncError::io(path, e)),
                }
                create(path)?
                    .ok_or_else(|| conflict(path, "another run took over the stale lock"))?
            }
        };

        let stamp = format!(
            "pid={} started={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        file.write_all(stamp.as_bytes())
            .map_err(|e| SyncError::io(path, e))?;

        tracing::debug!(path = %path.display(), "Acquired station lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Remove a lock file regardless of its holder.
    ///
    /// Returns whether a lock file existed.
    pub fn force_release(path: &Path) -> SyncResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "Station lock removed on request");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }
}

impl Drop for StationLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release station lock");
        }
    }
}

/// `None` when the file already exists
fn create(path: &Path) -> SyncResult<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

fn conflict(path: &Path, holder: &str) -> SyncError {
    SyncError::ConcurrencyConflict(format!(
        "{} is held by another run ({}); use --force-unlock if no run is active",
        path.display(),
        holder.trim()
    ))
}

/// Pid recorded in a lock file, if it has one
fn holder_pid(content: &str) -> Option<u32> {
    content
        .split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

/// A lock is stale only when its recorded process is known to be gone
fn is_stale(content: &str) -> bool {
    holder_pid(content).is_some_and(|pid| !process_alive(pid))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
