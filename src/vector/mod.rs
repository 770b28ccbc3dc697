//! Vector machinery: core value types, the quantization codec, the HNSW
//! graph, and the per-collection index manager.

pub mod ann;
pub mod hnsw;
pub mod quantize;
pub mod types;

pub use ann::{AnnIndexManager, IndexState};
pub use hnsw::{HnswGraph, HnswParams, Neighbor};
pub use quantize::{ProjectionCodec, QuantParams, cosine_similarity};
pub use types::{RecordId, Score, Slot, VectorDimension};
