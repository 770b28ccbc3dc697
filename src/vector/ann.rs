//! ANN index lifecycle: build, persist, load, and mutate the HNSW graph
//! for one collection.
//!
//! The persisted form is the framed binary layout shared with the id
//! mapping: magic, format version, crc32, bincode body. A missing file
//! and a corrupt file are distinct failures and both surface immediately;
//! there is no linear-scan fallback.

use crate::error::{EngineError, EngineResult};
use crate::storage::framed::{self, FrameError};
use crate::vector::hnsw::{HnswGraph, HnswParams, Neighbor};
use crate::vector::types::{RecordId, Slot};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for `ann_index.bin`.
const MAGIC: &[u8; 4] = b"SVAN";
/// On-disk format version for the ANN index file.
const FORMAT_VERSION: u32 = 1;

/// Lifecycle state of a collection's ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No graph loaded or built yet
    Uninitialized,
    /// Full build in progress
    Building,
    /// Graph loaded and searchable
    Ready,
    /// Incremental insert/remove in progress
    Updating,
    /// Full rebuild replacing an existing graph
    Rebuilding,
}

/// Owns one collection's HNSW graph and its persisted file.
#[derive(Debug)]
pub struct AnnIndexManager {
    collection: String,
    path: PathBuf,
    graph: HnswGraph,
    state: IndexState,
}

impl AnnIndexManager {
    /// Creates an empty, unbuilt manager.
    pub fn new(collection: &str, path: PathBuf, params: HnswParams) -> Self {
        Self {
            collection: collection.to_string(),
            path,
            graph: HnswGraph::new(params),
            state: IndexState::Uninitialized,
        }
    }

    /// Builds the graph from scratch.
    ///
    /// Callers supply entries in ascending record-id order so repeated
    /// builds over the same records produce identical graphs.
    pub fn build(&mut self, entries: Vec<(Slot, RecordId, Vec<f32>)>) -> EngineResult<()> {
        self.state = if self.graph.node_count() > 0 {
            IndexState::Rebuilding
        } else {
            IndexState::Building
        };

        let params = self.graph.params();
        let mut graph = HnswGraph::new(params);
        let count = entries.len();
        for (slot, record_id, vector) in entries {
            graph.insert(slot, record_id, vector);
        }
        self.graph = graph;
        self.state = IndexState::Ready;

        info!(
            collection = %self.collection,
            nodes = count,
            "ANN index built"
        );
        Ok(())
    }

    /// Reads and decodes a persisted graph without touching any manager.
    ///
    /// The query pipeline calls this off-thread and installs the result
    /// once the embedding arrives; `load` wraps it for synchronous use.
    pub fn read_graph(collection: &str, path: &Path) -> EngineResult<HnswGraph> {
        let body = match framed::read_framed(path, MAGIC, FORMAT_VERSION) {
            Ok(body) => body,
            Err(FrameError::Missing) => {
                return Err(EngineError::IndexMissing {
                    collection: collection.to_string(),
                });
            }
            Err(FrameError::Corrupt(reason)) => {
                return Err(EngineError::IndexCorrupt {
                    collection: collection.to_string(),
                    reason,
                });
            }
            Err(FrameError::Io(e)) => {
                return Err(EngineError::Storage {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        bincode::deserialize(&body).map_err(|e| EngineError::IndexCorrupt {
            collection: collection.to_string(),
            reason: format!("graph body undecodable: {e}"),
        })
    }

    /// Loads the persisted graph from `ann_index.bin`.
    pub fn load(&mut self) -> EngineResult<()> {
        let graph = Self::read_graph(&self.collection, &self.path)?;
        self.install(graph);
        Ok(())
    }

    /// Adopts an already-decoded graph and marks the index searchable.
    pub fn install(&mut self, graph: HnswGraph) {
        debug!(
            collection = %self.collection,
            nodes = graph.node_count(),
            "ANN index loaded"
        );
        self.graph = graph;
        self.state = IndexState::Ready;
    }

    /// Writes the graph to `ann_index.bin` atomically.
    pub fn save(&self) -> EngineResult<()> {
        let body = bincode::serialize(&self.graph)?;
        framed::write_framed(&self.path, MAGIC, FORMAT_VERSION, &body).map_err(|e| {
            EngineError::Storage {
                path: self.path.clone(),
                source: e,
            }
        })?;
        debug!(
            collection = %self.collection,
            bytes = body.len(),
            "ANN index persisted"
        );
        Ok(())
    }

    /// Inserts one vector into the live graph.
    pub fn insert(&mut self, slot: Slot, record_id: RecordId, vector: Vec<f32>) {
        self.state = IndexState::Updating;
        self.graph.insert(slot, record_id, vector);
        self.state = IndexState::Ready;
    }

    /// Physically removes one node and restitches its neighborhood.
    pub fn remove(&mut self, slot: Slot) -> Option<RecordId> {
        self.state = IndexState::Updating;
        let removed = self.graph.remove(slot);
        self.state = IndexState::Ready;
        removed
    }

    /// Beam search for the `k` nearest stored vectors.
    pub fn search(&self, query: &[f32], k: usize, search_breadth: usize) -> Vec<Neighbor> {
        self.graph.search(query, k, search_breadth)
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        self.state
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool {
        self.graph.contains(slot)
    }

    /// Record ids present in the graph, for mapping consistency checks.
    pub fn record_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.graph.record_ids()
    }

    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.path
    }
}
