//! Staleness detection: compares a record's captured mtime against the
//! file currently on disk.
//!
//! Results are advisory. A stale record still participates in search; the
//! query layer annotates it so callers can decide whether to trust the
//! snippet or trigger a re-index. A file that no longer exists is also
//! stale, since its records describe content nobody can open anymore.

use crate::storage::record::Record;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

/// Checks records against current filesystem state.
///
/// Mtimes are cached per file for the life of the detector, so annotating
/// a result set stats each file once, not once per record. The cache is
/// interior-mutable; one detector can serve concurrent lookups.
#[derive(Debug, Default)]
pub struct StalenessDetector {
    root: PathBuf,
    mtimes: Mutex<HashMap<PathBuf, Option<u64>>>,
}

impl StalenessDetector {
    /// Creates a detector resolving record paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mtimes: Mutex::new(HashMap::new()),
        }
    }

    /// True if the record's source file changed or vanished since it was
    /// indexed.
    pub fn is_stale(&self, record: &Record) -> bool {
        match self.mtime_of(&record.path) {
            Some(mtime) => mtime != record.file_modified_at,
            None => true,
        }
    }

    /// Current mtime of one source file, in unix seconds. `None` when the
    /// file is missing or unreadable.
    pub fn mtime_of(&self, path: &Path) -> Option<u64> {
        if let Some(cached) = self.mtimes.lock().get(path) {
            return *cached;
        }

        let resolved = self.root.join(path);
        let mtime = std::fs::metadata(&resolved)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());

        trace!(path = %path.display(), ?mtime, "stat for staleness check");
        self.mtimes.lock().insert(path.to_path_buf(), mtime);
        mtime
    }
}

/// Current unix time in seconds, for `indexed_at` stamps.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
