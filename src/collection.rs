//! Collection lifecycle: creation, opening, validation, rebuild, and
//! deletion of one named vector corpus on disk.
//!
//! A collection directory holds `metadata.json`, the `records/` payload
//! directory, the id mapping, and the ANN index. Metadata owns every
//! parameter that must stay fixed for the life of the collection: the
//! embedding dimensionality, the quantization parameters including the
//! projection seed, and the ANN tuning knobs. Changing any of them means
//! a new collection; there is no in-place re-quantization.
//!
//! Concurrency: queries share a read lock; exactly one mutating
//! operation (update or rebuild) holds the write lock. Lock acquisition
//! never blocks unbounded; a held lock surfaces as `CollectionBusy`.

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::storage::framed::FrameError;
use crate::storage::id_map::IdMap;
use crate::storage::record::RecordStore;
use crate::vector::ann::{AnnIndexManager, IndexState};
use crate::vector::hnsw::HnswParams;
use crate::vector::quantize::{ProjectionCodec, QuantParams};
use crate::vector::types::{RecordId, VectorDimension};
use chrono::{DateTime, Utc};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// On-disk metadata schema version. Unrecognized versions are rejected,
/// never best-effort parsed.
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const RECORDS_DIR: &str = "records";
const ID_MAPPING_FILE: &str = "id_mapping.bin";
const ANN_INDEX_FILE: &str = "ann_index.bin";

/// Persisted collection parameters (`metadata.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    /// Root the records' relative paths resolve against
    pub corpus_root: PathBuf,
    /// Width of the embeddings the provider produces for this collection
    pub vector_dimensionality: usize,
    pub quantization: QuantParams,
    pub ann: HnswParams,
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
}

/// Mutable per-collection storage, guarded by the collection lock.
#[derive(Debug)]
pub(crate) struct CollectionState {
    pub(crate) records: RecordStore,
    pub(crate) id_map: IdMap,
    pub(crate) ann: AnnIndexManager,
}

/// Handle to one open collection.
pub struct Collection {
    dir: PathBuf,
    metadata: CollectionMetadata,
    codec: ProjectionCodec,
    pub(crate) state: RwLock<CollectionState>,
}

/// Outcome of `validate`: every divergence found, nothing repaired.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Records whose payload width disagrees with the codec
    pub dimension_mismatches: Vec<RecordId>,
    /// Mapping entries with no backing record, and vice versa
    pub mapping_inconsistencies: Vec<String>,
    /// Index nodes whose record no longer exists
    pub orphaned_index_nodes: Vec<RecordId>,
    /// Records absent from the ANN index
    pub orphaned_records: Vec<RecordId>,
    /// Live record count vs. index node count, when they differ
    pub node_count_divergence: Option<(usize, usize)>,
    /// Set when `ann_index.bin` is absent while records exist
    pub index_missing: bool,
}

impl ValidationReport {
    /// True when the collection needs no rebuild.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dimension_mismatches.is_empty()
            && self.mapping_inconsistencies.is_empty()
            && self.orphaned_index_nodes.is_empty()
            && self.orphaned_records.is_empty()
            && self.node_count_divergence.is_none()
            && !self.index_missing
    }
}

/// Point-in-time summary for CLI and server collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub record_count: usize,
    pub file_count: usize,
    /// Node count of the in-memory graph, when one is loaded
    pub index_node_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Collection {
    /// Creates a new collection directory and its metadata.
    ///
    /// The projection seed is drawn once here and persisted; every later
    /// open reconstructs the identical codec from it.
    pub fn create(
        index_root: &Path,
        name: &str,
        corpus_root: &Path,
        dimensionality: usize,
        settings: &Settings,
    ) -> EngineResult<Self> {
        let dir = index_root.join(name);
        if dir.exists() {
            return Err(EngineError::CollectionExists {
                name: name.to_string(),
            });
        }

        let dimension = VectorDimension::new(dimensionality)?;
        let quantization = QuantParams {
            reduced_dims: settings.quantization.reduced_dims,
            bits_per_component: settings.quantization.bits_per_component,
            projection_seed: rand::rng().random(),
        };
        // Rejects unsupported bits_per_component before anything touches disk
        let codec = ProjectionCodec::new(dimension, quantization)?;

        let metadata = CollectionMetadata {
            name: name.to_string(),
            corpus_root: corpus_root.to_path_buf(),
            vector_dimensionality: dimensionality,
            quantization,
            ann: HnswParams {
                graph_degree: settings.ann.graph_degree,
                build_breadth: settings.ann.build_breadth,
                search_breadth: settings.ann.search_breadth,
            },
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
        };

        std::fs::create_dir_all(&dir).map_err(|e| EngineError::Storage {
            path: dir.clone(),
            source: e,
        })?;
        write_metadata(&dir, &metadata)?;

        let records = RecordStore::create(dir.join(RECORDS_DIR))?;
        let ann = AnnIndexManager::new(name, dir.join(ANN_INDEX_FILE), metadata.ann);

        info!(collection = name, dimensionality, "collection created");
        Ok(Self {
            dir,
            metadata,
            codec,
            state: RwLock::new(CollectionState {
                records,
                id_map: IdMap::new(),
                ann,
            }),
        })
    }

    /// Opens an existing collection, sweeping uncommitted record files.
    ///
    /// The ANN index is not read here; the first query loads it, and
    /// mutation paths build it as needed.
    pub fn open(index_root: &Path, name: &str) -> EngineResult<Self> {
        let dir = index_root.join(name);
        let metadata = read_metadata(&dir, name)?;

        if metadata.format_version != FORMAT_VERSION {
            return Err(EngineError::UnsupportedFormatVersion {
                found: metadata.format_version,
                supported: FORMAT_VERSION,
            });
        }

        let dimension = VectorDimension::new(metadata.vector_dimensionality)?;
        let codec = ProjectionCodec::new(dimension, metadata.quantization)?;

        let id_map = match IdMap::load(&dir.join(ID_MAPPING_FILE)) {
            Ok(map) => map,
            // A collection created but never indexed has no mapping yet
            Err(FrameError::Missing) => IdMap::new(),
            Err(FrameError::Corrupt(reason)) => {
                return Err(EngineError::MappingInconsistency {
                    collection: name.to_string(),
                    reason,
                });
            }
            Err(FrameError::Io(e)) => {
                return Err(EngineError::Storage {
                    path: dir.join(ID_MAPPING_FILE),
                    source: e,
                });
            }
        };

        let live: HashSet<RecordId> = id_map.entries().into_iter().map(|(id, _)| id).collect();
        let records = RecordStore::open(dir.join(RECORDS_DIR), &live)?;
        let ann = AnnIndexManager::new(name, dir.join(ANN_INDEX_FILE), metadata.ann);

        Ok(Self {
            dir,
            metadata,
            codec,
            state: RwLock::new(CollectionState {
                records,
                id_map,
                ann,
            }),
        })
    }

    /// Removes a collection and everything under it.
    pub fn delete(index_root: &Path, name: &str) -> EngineResult<()> {
        let dir = index_root.join(name);
        if !dir.exists() {
            return Err(EngineError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        std::fs::remove_dir_all(&dir).map_err(|e| EngineError::Storage {
            path: dir,
            source: e,
        })?;
        info!(collection = name, "collection deleted");
        Ok(())
    }

    /// Checks every cross-structure invariant and reports divergences.
    ///
    /// Nothing is repaired here. A dirty report means `rebuild` is the
    /// sanctioned fix.
    pub async fn validate(&self) -> EngineResult<ValidationReport> {
        let state = self.try_read()?;
        let mut report = ValidationReport::default();

        for id in state.records.sorted_ids() {
            let record = state
                .records
                .get(id)
                .ok_or_else(|| EngineError::MappingInconsistency {
                    collection: self.metadata.name.clone(),
                    reason: format!("record {} vanished during validation", id.to_hex()),
                })?;
            if record.payload.len() != self.codec.params().reduced_dims {
                report.dimension_mismatches.push(id);
            }
            if state.id_map.to_internal(id).is_none() {
                report
                    .mapping_inconsistencies
                    .push(format!("record {} has no mapping entry", id.to_hex()));
            }
        }

        for (id, slot) in state.id_map.entries() {
            if state.records.get(id).is_none() {
                report
                    .mapping_inconsistencies
                    .push(format!("mapping entry {} -> {slot} has no record", id.to_hex()));
            }
            if state.id_map.to_external(slot) != Some(id) {
                report
                    .mapping_inconsistencies
                    .push(format!("mapping for {} is not bijective", id.to_hex()));
            }
        }

        // Compare against the persisted graph, not a possibly-stale
        // in-memory one
        match AnnIndexManager::read_graph(&self.metadata.name, &self.dir.join(ANN_INDEX_FILE)) {
            Ok(graph) => {
                let live: HashSet<RecordId> = state.records.sorted_ids().into_iter().collect();
                let mut indexed = HashSet::new();
                for id in graph.record_ids() {
                    indexed.insert(id);
                    if !live.contains(&id) {
                        report.orphaned_index_nodes.push(id);
                    }
                }
                for id in &live {
                    if !indexed.contains(id) {
                        report.orphaned_records.push(*id);
                    }
                }
                report.orphaned_index_nodes.sort();
                report.orphaned_records.sort();
                if graph.node_count() != live.len() {
                    report.node_count_divergence = Some((live.len(), graph.node_count()));
                }
            }
            Err(EngineError::IndexMissing { .. }) => {
                report.index_missing = !state.records.is_empty();
            }
            Err(e) => return Err(e),
        }

        if !report.is_clean() {
            warn!(collection = %self.metadata.name, ?report, "validation found divergences");
        }
        Ok(report)
    }

    /// Rebuilds the ANN index from the live record set.
    ///
    /// The sanctioned recovery from any validation failure, and the only
    /// path across incompatible index states. Insertion order is
    /// ascending record id, so rebuilds are reproducible.
    pub async fn rebuild(&self) -> EngineResult<()> {
        let mut state = self.try_write()?;

        let ids = state.records.sorted_ids();
        let entries = ids
            .par_iter()
            .map(|&id| {
                let record = state.records.get(id).ok_or_else(|| {
                    EngineError::MappingInconsistency {
                        collection: self.metadata.name.clone(),
                        reason: format!("record {} vanished during rebuild", id.to_hex()),
                    }
                })?;
                let slot = state.id_map.to_internal(id).ok_or_else(|| {
                    EngineError::MappingInconsistency {
                        collection: self.metadata.name.clone(),
                        reason: format!("record {} has no slot", id.to_hex()),
                    }
                })?;
                let vector = self.codec.dequantize(&record.payload)?;
                Ok((slot, id, vector))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        state.ann.build(entries)?;
        state.ann.save()?;
        info!(collection = %self.metadata.name, nodes = ids.len(), "collection rebuilt");
        Ok(())
    }

    /// Snapshot of collection size and provenance.
    pub async fn stats(&self) -> EngineResult<CollectionStats> {
        let state = self.try_read()?;
        let index_node_count = match state.ann.state() {
            IndexState::Uninitialized => None,
            _ => Some(state.ann.node_count()),
        };
        Ok(CollectionStats {
            name: self.metadata.name.clone(),
            record_count: state.records.len(),
            file_count: state.records.file_count(),
            index_node_count,
            created_at: self.metadata.created_at,
        })
    }

    /// Confirms the ANN index is loaded, reading it off-thread if not.
    pub(crate) async fn ensure_searchable(&self) -> EngineResult<()> {
        {
            let state = self.try_read()?;
            if state.ann.state() != IndexState::Uninitialized {
                return Ok(());
            }
        }

        let name = self.metadata.name.clone();
        let path = self.dir.join(ANN_INDEX_FILE);
        let graph = tokio::task::spawn_blocking(move || AnnIndexManager::read_graph(&name, &path))
            .await
            .map_err(|e| EngineError::Serialization(format!("index load task failed: {e}")))??;

        let mut state = self.try_write()?;
        if state.ann.state() == IndexState::Uninitialized {
            state.ann.install(graph);
        }
        Ok(())
    }

    pub(crate) fn try_read(
        &self,
    ) -> EngineResult<tokio::sync::RwLockReadGuard<'_, CollectionState>> {
        self.state.try_read().map_err(|_| EngineError::CollectionBusy {
            collection: self.metadata.name.clone(),
        })
    }

    pub(crate) fn try_write(
        &self,
    ) -> EngineResult<tokio::sync::RwLockWriteGuard<'_, CollectionState>> {
        self.state.try_write().map_err(|_| EngineError::CollectionBusy {
            collection: self.metadata.name.clone(),
        })
    }

    #[must_use]
    pub fn metadata(&self) -> &CollectionMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn codec(&self) -> &ProjectionCodec {
        &self.codec
    }

    pub(crate) fn mapping_path(&self) -> PathBuf {
        self.dir.join(ID_MAPPING_FILE)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.metadata.name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

fn write_metadata(dir: &Path, metadata: &CollectionMetadata) -> EngineResult<()> {
    let path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(|e| EngineError::Storage {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| EngineError::Storage { path, source: e })
}

fn read_metadata(dir: &Path, name: &str) -> EngineResult<CollectionMetadata> {
    let path = dir.join(METADATA_FILE);
    let json = match std::fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        Err(e) => return Err(EngineError::FileRead { path, source: e }),
    };
    serde_json::from_str(&json).map_err(|e| EngineError::Serialization(format!(
        "metadata for collection '{name}' is undecodable: {e}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.quantization.reduced_dims = 4;
        settings
    }

    #[tokio::test]
    async fn create_then_open_preserves_metadata() {
        let dir = TempDir::new().unwrap();
        let created =
            Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()).unwrap();
        let seed = created.metadata().quantization.projection_seed;

        let opened = Collection::open(dir.path(), "code").unwrap();
        assert_eq!(opened.metadata().name, "code");
        assert_eq!(opened.metadata().vector_dimensionality, 8);
        assert_eq!(opened.metadata().quantization.projection_seed, seed);
    }

    #[tokio::test]
    async fn duplicate_create_is_collection_exists() {
        let dir = TempDir::new().unwrap();
        Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()).unwrap();

        match Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()) {
            Err(EngineError::CollectionExists { name }) => assert_eq!(name, "code"),
            other => panic!("expected CollectionExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_unknown_name_is_not_found() {
        let dir = TempDir::new().unwrap();
        match Collection::open(dir.path(), "nope") {
            Err(EngineError::CollectionNotFound { name }) => assert_eq!(name, "nope"),
            other => panic!("expected CollectionNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_rejects_future_format_version() {
        let dir = TempDir::new().unwrap();
        let collection =
            Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()).unwrap();

        let mut metadata = collection.metadata().clone();
        metadata.format_version = 99;
        write_metadata(&dir.path().join("code"), &metadata).unwrap();

        match Collection::open(dir.path(), "code") {
            Err(EngineError::UnsupportedFormatVersion { found, supported }) => {
                assert_eq!(found, 99);
                assert_eq!(supported, FORMAT_VERSION);
            }
            other => panic!("expected UnsupportedFormatVersion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()).unwrap();

        Collection::delete(dir.path(), "code").unwrap();
        assert!(!dir.path().join("code").exists());
        assert!(matches!(
            Collection::delete(dir.path(), "code"),
            Err(EngineError::CollectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_collection_validates_clean() {
        let dir = TempDir::new().unwrap();
        let collection =
            Collection::create(dir.path(), "code", Path::new("/repo"), 8, &settings()).unwrap();

        let report = collection.validate().await.unwrap();
        assert!(report.is_clean());
    }
}
