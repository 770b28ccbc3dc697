//! Record persistence: one indexed chunk per file under `records/`.
//!
//! Each record is a bincode-encoded file named by its hex identifier,
//! written through a sibling tmp file and an atomic rename. The unit of
//! CRUD is the record; query paths only read, mutations come exclusively
//! from the indexer and the incremental update engine.
//!
//! Crash recovery follows a single rule: the persisted ID mapping is the
//! commit point. On open, any record file whose id is absent from the
//! mapping is the residue of an interrupted put or delete, and is swept.

use crate::error::{EngineError, EngineResult};
use crate::vector::types::RecordId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension for record payload files.
const RECORD_EXT: &str = "rec";

/// One indexed chunk of source content.
///
/// The identifier is immutable: a changed chunk is superseded by a record
/// with a fresh id rather than mutated in place, so stale identifiers are
/// never reused and graph edges cannot dangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier derived from path, chunk offset, and content hash
    pub id: RecordId,
    /// Quantized vector payload (codec output, one i8 per reduced dim)
    pub payload: Vec<i8>,
    /// Source file path, relative to the corpus root
    pub path: PathBuf,
    /// First line of the chunk, 1-based
    pub start_line: u32,
    /// Last line of the chunk, inclusive
    pub end_line: u32,
    /// Source file modification time captured at index time (unix seconds)
    pub file_modified_at: u64,
    /// When this record was written (unix seconds)
    pub indexed_at: u64,
    /// Optional language tag inferred from the file extension
    pub language: Option<String>,
}

/// Filesystem-backed record store with in-memory id and per-file maps.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    records: HashMap<RecordId, Record>,
    by_file: HashMap<PathBuf, Vec<RecordId>>,
}

impl RecordStore {
    /// Creates an empty store, creating `dir` if needed.
    pub fn create(dir: PathBuf) -> EngineResult<Self> {
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::Storage {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            dir,
            records: HashMap::new(),
            by_file: HashMap::new(),
        })
    }

    /// Opens an existing store, loading every record the mapping declares
    /// live and sweeping files the mapping does not know about.
    pub fn open(dir: PathBuf, live_ids: &HashSet<RecordId>) -> EngineResult<Self> {
        let mut store = Self::create(dir)?;

        let entries = std::fs::read_dir(&store.dir).map_err(|e| EngineError::Storage {
            path: store.dir.clone(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Storage {
                path: store.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(RecordId::from_hex);

            match id {
                Some(id) if live_ids.contains(&id) => {
                    let bytes = std::fs::read(&path).map_err(|e| EngineError::Storage {
                        path: path.clone(),
                        source: e,
                    })?;
                    let record: Record = bincode::deserialize(&bytes).map_err(|e| {
                        EngineError::Serialization(format!(
                            "record {} is undecodable: {e}",
                            path.display()
                        ))
                    })?;
                    store.index_in_memory(record);
                }
                _ => {
                    // Residue of an interrupted put or delete; the mapping
                    // never committed this id.
                    warn!(path = %path.display(), "sweeping record file absent from mapping");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        debug!(records = store.records.len(), dir = %store.dir.display(), "record store opened");
        Ok(store)
    }

    /// Persists a record and registers it in memory.
    pub fn put(&mut self, record: Record) -> EngineResult<()> {
        let path = self.record_path(record.id);
        let bytes = bincode::serialize(&record)?;

        let tmp = path.with_extension("tmp");
        // Bytes must be durable before the rename; the mapping commit
        // that follows a put assumes the record file survives a crash.
        write_synced(&tmp, &bytes).map_err(|e| EngineError::Storage {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| EngineError::Storage {
            path: path.clone(),
            source: e,
        })?;

        self.index_in_memory(record);
        Ok(())
    }

    /// Fetches a record by identifier.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Removes a record's file and in-memory entries, returning it.
    ///
    /// Callers commit the mapping before invoking this, so a crash between
    /// the two leaves only a sweepable orphan file.
    pub fn delete(&mut self, id: RecordId) -> EngineResult<Option<Record>> {
        let Some(record) = self.records.remove(&id) else {
            return Ok(None);
        };

        if let Some(ids) = self.by_file.get_mut(&record.path) {
            ids.retain(|&r| r != id);
            if ids.is_empty() {
                self.by_file.remove(&record.path);
            }
        }

        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::Storage { path, source: e }),
        }

        Ok(Some(record))
    }

    /// Record identifiers for one source file, ascending.
    #[must_use]
    pub fn list_by_file(&self, path: &Path) -> Vec<RecordId> {
        let mut ids = self.by_file.get(path).cloned().unwrap_or_default();
        ids.sort();
        ids
    }

    /// All live record ids, ascending. Build order for reproducible
    /// ANN construction.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.records.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Distinct source files with at least one record.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index_in_memory(&mut self, record: Record) {
        self.by_file
            .entry(record.path.clone())
            .or_default()
            .push(record.id);
        self.records.insert(record.id, record);
    }

    fn record_path(&self, id: RecordId) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", id.to_hex()))
    }
}

/// Writes bytes and flushes them to the device before returning, so a
/// rename over the result is a real durability point.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id_seed: u64, path: &str, start: u32) -> Record {
        Record {
            id: RecordId::new(id_seed).unwrap(),
            payload: vec![1, -2, 3, -4],
            path: PathBuf::from(path),
            start_line: start,
            end_line: start + 39,
            file_modified_at: 1_700_000_000,
            indexed_at: 1_700_000_100,
            language: Some("rust".to_string()),
        }
    }

    #[test]
    fn put_get_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::create(dir.path().join("records")).unwrap();

        let record = sample(11, "src/lib.rs", 1);
        store.put(record.clone()).unwrap();
        assert_eq!(store.get(record.id), Some(&record));
        assert_eq!(store.len(), 1);

        let deleted = store.delete(record.id).unwrap().unwrap();
        assert_eq!(deleted.id, record.id);
        assert!(store.get(record.id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn put_is_durable_with_no_tmp_residue() {
        let dir = TempDir::new().unwrap();
        let records_dir = dir.path().join("records");
        let mut store = RecordStore::create(records_dir.clone()).unwrap();

        let record = sample(77, "src/lib.rs", 1);
        store.put(record.clone()).unwrap();

        // The committed file decodes on its own and no tmp sibling is
        // left behind by the synced write-then-rename.
        let path = records_dir.join(format!("{}.rec", record.id.to_hex()));
        let bytes = std::fs::read(&path).unwrap();
        let decoded: Record = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn list_by_file_is_sorted() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::create(dir.path().join("records")).unwrap();

        store.put(sample(30, "src/a.rs", 41)).unwrap();
        store.put(sample(10, "src/a.rs", 1)).unwrap();
        store.put(sample(20, "src/b.rs", 1)).unwrap();

        let ids = store.list_by_file(Path::new("src/a.rs"));
        assert_eq!(
            ids,
            vec![RecordId::new(10).unwrap(), RecordId::new(30).unwrap()]
        );
        assert_eq!(store.file_count(), 2);
    }

    #[test]
    fn reopen_loads_live_records() {
        let dir = TempDir::new().unwrap();
        let records_dir = dir.path().join("records");

        let r1 = sample(1, "a.rs", 1);
        let r2 = sample(2, "b.rs", 1);
        {
            let mut store = RecordStore::create(records_dir.clone()).unwrap();
            store.put(r1.clone()).unwrap();
            store.put(r2.clone()).unwrap();
        }

        let live: HashSet<RecordId> = [r1.id, r2.id].into_iter().collect();
        let store = RecordStore::open(records_dir, &live).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(r1.id), Some(&r1));
    }

    #[test]
    fn open_sweeps_records_absent_from_mapping() {
        let dir = TempDir::new().unwrap();
        let records_dir = dir.path().join("records");

        let committed = sample(1, "a.rs", 1);
        let orphan = sample(2, "b.rs", 1);
        {
            let mut store = RecordStore::create(records_dir.clone()).unwrap();
            store.put(committed.clone()).unwrap();
            store.put(orphan.clone()).unwrap();
        }

        // Only record 1 made it into the mapping before the "crash"
        let live: HashSet<RecordId> = [committed.id].into_iter().collect();
        let store = RecordStore::open(records_dir.clone(), &live).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get(orphan.id).is_none());
        // The orphan file is gone from disk too
        assert!(!records_dir.join(format!("{}.rec", orphan.id.to_hex())).exists());
    }

    #[test]
    fn delete_tolerates_already_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::create(dir.path().join("records")).unwrap();

        let record = sample(5, "a.rs", 1);
        store.put(record.clone()).unwrap();
        std::fs::remove_file(
            dir.path()
                .join("records")
                .join(format!("{}.rec", record.id.to_hex())),
        )
        .unwrap();

        // In-memory entry still clears without an error
        assert!(store.delete(record.id).unwrap().is_some());
    }
}
