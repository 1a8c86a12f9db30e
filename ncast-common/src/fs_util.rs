//! Filesystem helpers

use crate::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `contents` to `path` atomically.
///
/// The bytes go to a temporary file in the destination directory, which is
/// flushed, synced and then renamed over `path`. Readers observe either the
/// previous content or the new content, never a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.as_file().sync_all()?;

    temp.persist(path)
        .map_err(|e| Error::Io(e.error))?;

    tracing::debug!(path = %path.display(), bytes = contents.len(), "Atomic write complete");
    Ok(())
}
