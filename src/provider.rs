//! Embedding provider seam.
//!
//! The engine never computes embeddings itself. Callers hand it a
//! provider, typically a wrapper over a local model or a remote service,
//! and every failure from it surfaces as `ProviderFailure` without
//! retries. Vectors must arrive with the dimension the provider declares;
//! the codec rejects anything else before quantization.

use crate::error::EngineResult;
use crate::vector::types::VectorDimension;

/// Produces dense float vectors for text.
///
/// Implementations must be thread-safe and should batch internally where
/// the backend supports it. The declared dimension is fixed for the life
/// of the provider and must match the collection it feeds.
pub trait EmbeddingProvider: Send + Sync {
    /// Generates one embedding per input text, in input order.
    fn embed(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = EngineResult<Vec<Vec<f32>>>> + Send;

    /// Dimension of every vector this provider produces.
    fn dimension(&self) -> VectorDimension;
}

impl<P: EmbeddingProvider> EmbeddingProvider for &P {
    fn embed(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = EngineResult<Vec<Vec<f32>>>> + Send {
        (**self).embed(texts)
    }

    fn dimension(&self) -> VectorDimension {
        (**self).dimension()
    }
}
