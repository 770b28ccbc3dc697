//! Query execution: embed, search, resolve, filter, rank.
//!
//! Embedding acquisition is network-bound and index loading is
//! disk-bound, so the pipeline runs them concurrently and proceeds only
//! once both finish. The candidate set is overfetched to absorb
//! filtering losses, then filtered, annotated for staleness, and ranked
//! deterministically (descending score, ascending record id on ties).
//!
//! A missing or corrupt index fails the query immediately. There is no
//! degraded scan mode; the error names the collection and the fix.

use crate::collection::Collection;
use crate::config::QueryConfig;
use crate::error::{EngineError, EngineResult};
use crate::provider::EmbeddingProvider;
use crate::staleness::StalenessDetector;
use crate::vector::types::{RecordId, Score};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Exclusion filters applied after ANN search.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Glob patterns a result's path must match, e.g. `src/**/*.rs`
    pub path_globs: Vec<String>,
    /// Language tag a result must carry
    pub language: Option<String>,
    /// Results scoring below this are dropped
    pub min_score: Option<Score>,
}

impl QueryFilters {
    fn glob_set(&self) -> EngineResult<Option<GlobSet>> {
        if self.path_globs.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.path_globs {
            let glob = Glob::new(pattern).map_err(|e| EngineError::Config {
                reason: format!("invalid path glob '{pattern}': {e}"),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| EngineError::Config {
            reason: format!("path glob set failed to compile: {e}"),
        })?;
        Ok(Some(set))
    }
}

/// One query against one collection.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub limit: usize,
    pub filters: QueryFilters,
    /// Overrides the collection's configured search breadth
    pub search_breadth: Option<usize>,
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    /// A request with default limit and no filters.
    pub fn new(text: impl Into<String>, config: &QueryConfig) -> Self {
        Self {
            text: text.into(),
            limit: config.default_limit,
            filters: QueryFilters::default(),
            search_breadth: None,
            timeout: None,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub record_id: RecordId,
    pub path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Option<String>,
    pub score: Score,
    /// The backing file changed or vanished since this record was indexed
    pub stale: bool,
}

/// Runs the full pipeline with the configured timeout.
///
/// The timeout covers everything from embedding acquisition to ranking.
/// On expiry every in-flight step is cancelled and no partial results
/// are returned.
pub async fn search<P: EmbeddingProvider>(
    collection: &Collection,
    provider: &P,
    request: &QueryRequest,
    config: &QueryConfig,
) -> EngineResult<Vec<SearchResult>> {
    let millis = request
        .timeout
        .map_or(config.timeout_ms, |t| t.as_millis() as u64);
    if millis == 0 {
        return execute(collection, provider, request, config).await;
    }

    tokio::time::timeout(
        Duration::from_millis(millis),
        execute(collection, provider, request, config),
    )
    .await
    .map_err(|_| EngineError::QueryTimeout { millis })?
}

async fn execute<P: EmbeddingProvider>(
    collection: &Collection,
    provider: &P,
    request: &QueryRequest,
    config: &QueryConfig,
) -> EngineResult<Vec<SearchResult>> {
    let expected = collection.metadata().vector_dimensionality;
    let actual = provider.dimension().get();
    if actual != expected {
        return Err(EngineError::DimensionMismatch { expected, actual });
    }
    let glob_set = request.filters.glob_set()?;

    // Embedding acquisition and index loading genuinely overlap here.
    // The slice must outlive the embed future, so bind it first.
    let texts = [request.text.as_str()];
    let (embeddings, ()) = tokio::try_join!(
        provider.embed(&texts),
        collection.ensure_searchable(),
    )?;
    let embedding = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::ProviderFailure {
            reason: "provider returned no embedding for the query text".to_string(),
        })?;

    // Same codec as the stored vectors, so distances are comparable
    let codec = collection.codec();
    let query_vector = codec.dequantize(&codec.quantize(&embedding)?)?;

    let state = collection.try_read()?;
    let breadth = request
        .search_breadth
        .unwrap_or(collection.metadata().ann.search_breadth);
    let candidate_count = request.limit.saturating_mul(config.overfetch_factor);
    let candidates = state.ann.search(&query_vector, candidate_count, breadth);
    debug!(
        collection = %collection.metadata().name,
        candidates = candidates.len(),
        breadth,
        "ANN search complete"
    );

    let detector = StalenessDetector::new(&collection.metadata().corpus_root);
    let mut results = Vec::with_capacity(candidates.len());
    for neighbor in candidates {
        let record_id = state
            .id_map
            .to_external(neighbor.slot)
            .ok_or_else(|| EngineError::MappingInconsistency {
                collection: collection.metadata().name.clone(),
                reason: format!("index slot {} has no mapping entry", neighbor.slot),
            })?;
        let record =
            state
                .records
                .get(record_id)
                .ok_or_else(|| EngineError::MappingInconsistency {
                    collection: collection.metadata().name.clone(),
                    reason: format!("record {} is indexed but not stored", record_id.to_hex()),
                })?;

        let score = Score::from_cosine(1.0 - neighbor.distance);
        if let Some(min) = request.filters.min_score
            && score < min
        {
            continue;
        }
        if let Some(language) = &request.filters.language
            && record.language.as_deref() != Some(language.as_str())
        {
            continue;
        }
        if let Some(set) = &glob_set
            && !set.is_match(&record.path)
        {
            continue;
        }

        results.push(SearchResult {
            record_id,
            path: record.path.clone(),
            start_line: record.start_line,
            end_line: record.end_line,
            language: record.language.clone(),
            score,
            // Annotation only; stale results still rank normally
            stale: detector.is_stale(record),
        });
    }

    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    results.truncate(request.limit);
    Ok(results)
}
