//! Type-safe wrappers and core types for the vector index engine.
//!
//! This module provides newtypes following the project's strict type
//! safety guidelines: stable external record identifiers, dense internal
//! graph slots, validated similarity scores, and dimension checks that
//! prevent primitive obsession.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroU64;
use std::path::Path;

/// Stable external identifier for one indexed chunk.
///
/// Derived from the chunk's file path, chunk offset, and content hash, so
/// a changed chunk always gets a fresh identifier and stale identifiers
/// are never reused (no dangling graph edges after updates).
///
/// Uses `NonZeroU64` internally so an id of zero can never be confused
/// with uninitialized state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RecordId(NonZeroU64);

impl RecordId {
    /// Creates a `RecordId` from a non-zero u64.
    ///
    /// Returns `None` if the provided id is zero.
    #[must_use]
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    /// Derives the stable identifier for a chunk.
    ///
    /// The derivation hashes path, chunk offset, and a hash of the chunk
    /// content, so identical content at the same location always maps to
    /// the same id while any content change produces a new one.
    #[must_use]
    pub fn derive(path: &Path, chunk_offset: u32, content_hash: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk_offset.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(content_hash.as_bytes());
        let digest = hasher.finalize();

        let raw = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        // Force the low bit so the id is never zero.
        Self(NonZeroU64::new(raw | 1).expect("value has low bit set"))
    }

    /// Returns the underlying u64 value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Hex form used for record file names under `records/`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0.get())
    }

    /// Parses the hex form produced by [`RecordId::to_hex`].
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex, 16).ok().and_then(Self::new)
    }
}

/// Dense internal identifier used by the ANN graph.
///
/// Slots start at zero and are reclaimed through a free list when records
/// are deleted, keeping the graph's node addressing compact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Slot(u32);

impl Slot {
    /// Creates a new `Slot`.
    #[must_use]
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Index form for addressing per-slot arrays.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for similarity scores.
///
/// Scores are normalized to the range [0.0, 1.0] where 1.0 indicates
/// perfect similarity and 0.0 none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> EngineResult<Self> {
        if value.is_nan() {
            return Err(EngineError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(EngineError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Maps a cosine similarity in [-1, 1] onto the score range, clamping
    /// float noise at the boundaries.
    #[must_use]
    pub fn from_cosine(cosine: f32) -> Self {
        let normalized = ((cosine + 1.0) / 2.0).clamp(0.0, 1.0);
        Self(if normalized.is_nan() { 0.0 } else { normalized })
    }

    /// Creates a score of 0.0 (no similarity).
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Creates a score of 1.0 (perfect similarity).
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .expect("Score values are never NaN")
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> EngineResult<Self> {
        if dim == 0 {
            return Err(EngineError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    ///
    /// Mismatches are never silently truncated or padded.
    pub fn validate_vector(&self, vector: &[f32]) -> EngineResult<()> {
        if vector.len() != self.0 {
            return Err(EngineError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn record_id_derivation_is_stable() {
        let path = PathBuf::from("src/lib.rs");
        let a = RecordId::derive(&path, 0, "abc123");
        let b = RecordId::derive(&path, 0, "abc123");
        assert_eq!(a, b);

        // Different content produces a different id (new identifier on
        // supersede, never reuse)
        let c = RecordId::derive(&path, 0, "def456");
        assert_ne!(a, c);

        // Different offset produces a different id
        let d = RecordId::derive(&path, 40, "abc123");
        assert_ne!(a, d);
    }

    #[test]
    fn record_id_hex_round_trip() {
        let id = RecordId::derive(&PathBuf::from("a.rs"), 7, "hash");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 16);
        assert_eq!(RecordId::from_hex(&hex), Some(id));
    }

    #[test]
    fn record_id_rejects_zero() {
        assert!(RecordId::new(0).is_none());
        assert!(RecordId::new(42).is_some());
    }

    #[test]
    fn score_validation() {
        assert_eq!(Score::new(0.5).unwrap().get(), 0.5);
        assert_eq!(Score::zero().get(), 0.0);
        assert_eq!(Score::one().get(), 1.0);

        assert!(Score::new(-0.1).is_err());
        assert!(Score::new(1.1).is_err());
        assert!(Score::new(f32::NAN).is_err());
    }

    #[test]
    fn score_from_cosine_maps_range() {
        assert_eq!(Score::from_cosine(1.0).get(), 1.0);
        assert_eq!(Score::from_cosine(-1.0).get(), 0.0);
        assert!((Score::from_cosine(0.0).get() - 0.5).abs() < f32::EPSILON);
        // Float noise just past the boundary clamps instead of failing
        assert_eq!(Score::from_cosine(1.000001).get(), 1.0);
    }

    #[test]
    fn vector_dimension_validation() {
        let dim = VectorDimension::new(8).unwrap();
        assert_eq!(dim.get(), 8);
        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&[0.1; 8]).is_ok());
        assert!(dim.validate_vector(&[0.1; 4]).is_err());
    }

    #[test]
    fn slot_ordering() {
        assert!(Slot::new(1) < Slot::new(2));
        assert_eq!(Slot::new(3).index(), 3);
    }
}
