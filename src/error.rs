//! Error types for the vector index engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Every fatal error names
//! the collection involved and the remediation action.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Quantization input does not match the collection's declared width.
    /// Fatal for the record, not for the batch it arrived in.
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors come from the same embedding model as the collection"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "No ANN index found for collection '{collection}'\nSuggestion: Run a rebuild to construct the index before querying"
    )]
    IndexMissing { collection: String },

    #[error(
        "ANN index for collection '{collection}' is corrupt: {reason}\nSuggestion: Rebuild the collection to restore a valid index"
    )]
    IndexCorrupt { collection: String, reason: String },

    #[error(
        "Collection '{name}' already exists\nSuggestion: Open it, or delete it first to recreate"
    )]
    CollectionExists { name: String },

    #[error(
        "Collection '{name}' not found\nSuggestion: Check the collection name and index root path"
    )]
    CollectionNotFound { name: String },

    #[error(
        "ID mapping for collection '{collection}' is inconsistent: {reason}\nSuggestion: Rebuild the collection to restore the mapping"
    )]
    MappingInconsistency { collection: String, reason: String },

    /// Embedding acquisition failed. Propagated as-is; the engine never
    /// retries on the caller's behalf.
    #[error(
        "Embedding provider failed: {reason}\nSuggestion: Check provider connectivity and retry the operation"
    )]
    ProviderFailure { reason: String },

    #[error(
        "Collection '{collection}' is busy: a mutating operation is in progress\nSuggestion: Retry once the update or rebuild completes"
    )]
    CollectionBusy { collection: String },

    #[error(
        "Unrecognized format version {found} (supported: {supported})\nSuggestion: Rebuild the collection with this version of the engine"
    )]
    UnsupportedFormatVersion { found: u32, supported: u32 },

    #[error(
        "Invalid quantization parameters: {reason}\nSuggestion: Create a new collection with supported parameters"
    )]
    InvalidQuantization { reason: String },

    #[error("Query timed out after {millis}ms\nSuggestion: Raise the timeout or reduce search breadth")]
    QueryTimeout { millis: u64 },

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage error at '{path}': {source}\nSuggestion: Check disk space and file permissions")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Serialization error: {0}\nSuggestion: The on-disk data may be corrupted; rebuild the collection"
    )]
    Serialization(String),

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl EngineError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::IndexMissing { .. } => "INDEX_MISSING",
            Self::IndexCorrupt { .. } => "INDEX_CORRUPT",
            Self::CollectionExists { .. } => "COLLECTION_EXISTS",
            Self::CollectionNotFound { .. } => "COLLECTION_NOT_FOUND",
            Self::MappingInconsistency { .. } => "MAPPING_INCONSISTENCY",
            Self::ProviderFailure { .. } => "PROVIDER_FAILURE",
            Self::CollectionBusy { .. } => "COLLECTION_BUSY",
            Self::UnsupportedFormatVersion { .. } => "UNSUPPORTED_FORMAT_VERSION",
            Self::InvalidQuantization { .. } => "INVALID_QUANTIZATION",
            Self::QueryTimeout { .. } => "QUERY_TIMEOUT",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidScore { .. } => "INVALID_SCORE",
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexMissing { .. } => vec![
                "Rebuild the collection to construct the ANN index",
                "Check that the index root path points at the right directory",
            ],
            Self::IndexCorrupt { .. } | Self::MappingInconsistency { .. } => vec![
                "Rebuild the collection from its source files",
                "Check for disk errors or filesystem corruption",
            ],
            Self::CollectionBusy { .. } => {
                vec!["Wait for the in-flight update or rebuild to finish, then retry"]
            }
            Self::ProviderFailure { .. } => vec![
                "Verify the embedding provider is reachable",
                "Retry the operation; transient provider errors are common",
            ],
            Self::UnsupportedFormatVersion { .. } => {
                vec!["Rebuild the collection with this version of the engine"]
            }
            Self::Storage { .. } => {
                vec!["Check disk space and permissions in the index directory"]
            }
            _ => vec![],
        }
    }

    /// True for errors that invalidate the whole operation rather than a
    /// single record.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::IndexCorrupt { .. }
                | Self::IndexMissing { .. }
                | Self::MappingInconsistency { .. }
                | Self::UnsupportedFormatVersion { .. }
        )
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
