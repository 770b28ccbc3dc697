//! Configuration module for the vector index engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SEMVEC_` and use double
//! underscores to separate nested levels:
//! - `SEMVEC_ANN__GRAPH_DEGREE=24` sets `ann.graph_degree`
//! - `SEMVEC_QUERY__OVERFETCH_FACTOR=4` sets `query.overfetch_factor`
//! - `SEMVEC_QUANTIZATION__REDUCED_DIMS=128` sets `quantization.reduced_dims`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory under which collections are stored
    #[serde(default = "default_index_root")]
    pub index_root: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Quantization codec defaults for new collections
    #[serde(default)]
    pub quantization: QuantizationConfig,

    /// ANN graph defaults for new collections
    #[serde(default)]
    pub ann: AnnConfig,

    /// Query pipeline settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Chunking settings for indexing and incremental updates
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct QuantizationConfig {
    /// Number of dimensions after random projection
    #[serde(default = "default_reduced_dims")]
    pub reduced_dims: usize,

    /// Bits per quantized component (only 8 is supported in the current
    /// format version)
    #[serde(default = "default_bits_per_component")]
    pub bits_per_component: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct AnnConfig {
    /// Maximum neighbors per node on upper layers (layer 0 uses twice this)
    #[serde(default = "default_graph_degree")]
    pub graph_degree: usize,

    /// Candidate beam width during construction
    #[serde(default = "default_build_breadth")]
    pub build_breadth: usize,

    /// Candidate beam width during search; higher trades latency for recall
    #[serde(default = "default_search_breadth")]
    pub search_breadth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct QueryConfig {
    /// Candidate set multiplier to absorb filtering losses
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Default number of results when the caller does not specify one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Query timeout in milliseconds (0 disables the timeout)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct ChunkingConfig {
    /// Number of source lines per chunk
    #[serde(default = "default_chunk_lines")]
    pub lines_per_chunk: usize,
}

fn default_version() -> u32 {
    1
}

fn default_index_root() -> PathBuf {
    PathBuf::from(".semvec/index")
}

fn default_false() -> bool {
    false
}

fn default_reduced_dims() -> usize {
    64
}

fn default_bits_per_component() -> u8 {
    8
}

fn default_graph_degree() -> usize {
    16
}

fn default_build_breadth() -> usize {
    128
}

fn default_search_breadth() -> usize {
    64
}

fn default_overfetch_factor() -> usize {
    3
}

fn default_limit() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_chunk_lines() -> usize {
    40
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_root: default_index_root(),
            debug: default_false(),
            quantization: QuantizationConfig::default(),
            ann: AnnConfig::default(),
            query: QueryConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            reduced_dims: default_reduced_dims(),
            bits_per_component: default_bits_per_component(),
        }
    }
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            graph_degree: default_graph_degree(),
            build_breadth: default_build_breadth(),
            search_breadth: default_search_breadth(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: default_overfetch_factor(),
            default_limit: default_limit(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            lines_per_chunk: default_chunk_lines(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(PathBuf::from(".semvec/settings.toml"))
    }

    /// Load configuration with an explicit config file path
    pub fn load_from(config_path: PathBuf) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with SEMVEC_ prefix.
            // Double underscore separates nested levels; single underscore
            // remains as is within field names.
            .merge(Env::prefixed("SEMVEC_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.quantization.reduced_dims, 64);
        assert_eq!(settings.quantization.bits_per_component, 8);
        assert_eq!(settings.ann.graph_degree, 16);
        assert!(settings.ann.build_breadth >= settings.ann.search_breadth);
        assert!(settings.query.overfetch_factor >= 1);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("settings.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            "[ann]\ngraph_degree = 24\n\n[query]\noverfetch_factor = 5"
        )
        .unwrap();

        let settings = Settings::load_from(config_path).unwrap();
        assert_eq!(settings.ann.graph_degree, 24);
        assert_eq!(settings.query.overfetch_factor, 5);
        // Untouched fields keep defaults
        assert_eq!(settings.ann.build_breadth, 128);
    }
}
