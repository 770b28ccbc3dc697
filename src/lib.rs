//! Filesystem-resident vector index engine for semantic code search.
//!
//! No server process, no database: each collection is a directory of
//! quantized records, an id mapping, and a serialized HNSW graph. The
//! crate exposes collection lifecycle operations, a concurrent query
//! pipeline, and an incremental update engine; embedding generation
//! stays behind the [`EmbeddingProvider`] seam supplied by the caller.

pub mod collection;
pub mod config;
pub mod error;
pub mod provider;
pub mod query;
pub mod staleness;
pub mod storage;
pub mod update;
pub mod vector;

// Explicit exports for better API clarity
pub use collection::{Collection, CollectionMetadata, CollectionStats, ValidationReport};
pub use config::Settings;
pub use error::{EngineError, EngineResult};
pub use provider::EmbeddingProvider;
pub use query::{QueryFilters, QueryRequest, SearchResult, search};
pub use staleness::StalenessDetector;
pub use storage::{IdMap, Record, RecordStore};
pub use update::{UpdateReport, update};
pub use vector::{
    AnnIndexManager, HnswParams, IndexState, ProjectionCodec, QuantParams, RecordId, Score, Slot,
    VectorDimension,
};
