//! Quantization codec: lossy compression of embeddings for on-disk storage.
//!
//! Full-precision embeddings are projected to a reduced dimension with a
//! seeded ±1 random projection, unit-normalized, then scalar-quantized to
//! one signed byte per component. The projection matrix is derived from a
//! seed fixed at collection creation and persisted in `metadata.json`, so
//! the codec is fully deterministic for the life of a collection.
//!
//! Quantization is lossy by design: the guarantee is rank preservation of
//! nearest-neighbor ordering within tolerance, not exact round-trips.

use crate::error::{EngineError, EngineResult};
use crate::vector::types::VectorDimension;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// The only component width the current format version supports.
pub const SUPPORTED_BITS_PER_COMPONENT: u8 = 8;

/// Scale factor mapping [-1, 1] components onto i8.
const QUANT_SCALE: f32 = 127.0;

/// Quantization parameters persisted in collection metadata.
///
/// All records in a collection share these; changing them requires a new
/// collection (no in-place re-quantization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Number of dimensions after projection
    pub reduced_dims: usize,
    /// Bits per quantized component
    pub bits_per_component: u8,
    /// Seed for the random projection matrix, drawn once at collection
    /// creation and never regenerated
    pub projection_seed: u64,
}

/// Deterministic projection + scalar quantization codec.
///
/// One codec instance exists per open collection; query vectors pass
/// through the same instance as stored vectors so distance semantics are
/// comparable.
#[derive(Debug, Clone)]
pub struct ProjectionCodec {
    dimension: VectorDimension,
    params: QuantParams,
    /// Row-major `reduced_dims x dimension` matrix with entries
    /// ±1/sqrt(reduced_dims)
    projection: Vec<f32>,
}

impl ProjectionCodec {
    /// Builds the codec for a collection's declared dimensionality.
    ///
    /// Fails if the parameters are outside what the current format
    /// version supports.
    pub fn new(dimension: VectorDimension, params: QuantParams) -> EngineResult<Self> {
        if params.bits_per_component != SUPPORTED_BITS_PER_COMPONENT {
            return Err(EngineError::InvalidQuantization {
                reason: format!(
                    "bits_per_component must be {}, got {}",
                    SUPPORTED_BITS_PER_COMPONENT, params.bits_per_component
                ),
            });
        }
        if params.reduced_dims == 0 {
            return Err(EngineError::InvalidQuantization {
                reason: "reduced_dims cannot be zero".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(params.projection_seed);
        let scale = 1.0 / (params.reduced_dims as f32).sqrt();
        let projection = (0..params.reduced_dims * dimension.get())
            .map(|_| if rng.random::<bool>() { scale } else { -scale })
            .collect();

        Ok(Self {
            dimension,
            params,
            projection,
        })
    }

    /// The collection's declared full-precision dimensionality.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// The codec parameters this instance was built from.
    #[must_use]
    pub fn params(&self) -> QuantParams {
        self.params
    }

    /// Converts a full-precision embedding into the compact payload.
    ///
    /// Fails with `DimensionMismatch` if the input length disagrees with
    /// the collection's declared dimensionality; the input is never
    /// truncated or padded.
    pub fn quantize(&self, full_vector: &[f32]) -> EngineResult<Vec<i8>> {
        self.dimension.validate_vector(full_vector)?;

        let dim = self.dimension.get();
        let mut reduced = vec![0.0f32; self.params.reduced_dims];
        for (row, out) in reduced.iter_mut().enumerate() {
            let row_start = row * dim;
            *out = self.projection[row_start..row_start + dim]
                .iter()
                .zip(full_vector)
                .map(|(p, v)| p * v)
                .sum();
        }

        normalize(&mut reduced);

        Ok(reduced
            .iter()
            .map(|&c| (c.clamp(-1.0, 1.0) * QUANT_SCALE).round() as i8)
            .collect())
    }

    /// Expands a compact payload back into a comparable reduced vector.
    ///
    /// The result lives in the reduced space, not the original embedding
    /// space; it is comparable with other dequantized payloads and with
    /// quantized query vectors.
    pub fn dequantize(&self, payload: &[i8]) -> EngineResult<Vec<f32>> {
        if payload.len() != self.params.reduced_dims {
            return Err(EngineError::DimensionMismatch {
                expected: self.params.reduced_dims,
                actual: payload.len(),
            });
        }

        let mut reduced: Vec<f32> = payload.iter().map(|&q| q as f32 / QUANT_SCALE).collect();
        normalize(&mut reduced);
        Ok(reduced)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left as-is.
fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Calculate cosine similarity between two vectors of equal length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(dim: usize, reduced: usize, seed: u64) -> ProjectionCodec {
        ProjectionCodec::new(
            VectorDimension::new(dim).unwrap(),
            QuantParams {
                reduced_dims: reduced,
                bits_per_component: 8,
                projection_seed: seed,
            },
        )
        .unwrap()
    }

    /// Deterministic pseudo-random unit vector for tests.
    fn sample_vector(dim: usize, seed: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dim)
            .map(|i| (((seed * 31 + i * 7) % 97) as f32 / 97.0) - 0.5)
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
        v
    }

    #[test]
    fn quantize_is_deterministic_for_fixed_seed() {
        let a = codec(32, 16, 7);
        let b = codec(32, 16, 7);
        let v = sample_vector(32, 3);
        assert_eq!(a.quantize(&v).unwrap(), b.quantize(&v).unwrap());
    }

    #[test]
    fn different_seeds_give_different_payloads() {
        let a = codec(32, 16, 7);
        let b = codec(32, 16, 8);
        let v = sample_vector(32, 3);
        assert_ne!(a.quantize(&v).unwrap(), b.quantize(&v).unwrap());
    }

    #[test]
    fn quantize_rejects_wrong_dimension() {
        let c = codec(32, 16, 1);
        let result = c.quantize(&sample_vector(16, 0));
        assert!(matches!(
            result,
            Err(EngineError::DimensionMismatch {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn dequantize_rejects_wrong_payload_length() {
        let c = codec(32, 16, 1);
        assert!(c.dequantize(&[0i8; 8]).is_err());
    }

    #[test]
    fn unsupported_bits_rejected() {
        let result = ProjectionCodec::new(
            VectorDimension::new(32).unwrap(),
            QuantParams {
                reduced_dims: 16,
                bits_per_component: 4,
                projection_seed: 0,
            },
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidQuantization { .. })
        ));
    }

    #[test]
    fn identical_inputs_share_identical_payloads() {
        let c = codec(64, 32, 42);
        let v = sample_vector(64, 11);
        let p1 = c.quantize(&v).unwrap();
        let p2 = c.quantize(&v).unwrap();
        assert_eq!(p1, p2);

        // And the dequantized forms are maximally similar
        let d1 = c.dequantize(&p1).unwrap();
        let d2 = c.dequantize(&p2).unwrap();
        assert!(cosine_similarity(&d1, &d2) > 0.999);
    }

    #[test]
    fn round_trip_preserves_neighbor_ranking() {
        // Rank preservation within tolerance: the nearest neighbor of a
        // query in full space stays the nearest in quantized space for a
        // spread-out reference set.
        let dim = 128;
        let c = codec(dim, 64, 9);

        let reference: Vec<Vec<f32>> = (0..20).map(|i| sample_vector(dim, i * 131)).collect();
        let query = {
            // Slightly perturbed copy of reference vector 4
            let mut q = reference[4].clone();
            q[0] += 0.01;
            q
        };

        // Full-space nearest
        let full_best = reference
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                cosine_similarity(&query, a)
                    .partial_cmp(&cosine_similarity(&query, b))
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(full_best, 4);

        // Quantized-space nearest
        let dq: Vec<Vec<f32>> = reference
            .iter()
            .map(|v| c.dequantize(&c.quantize(v).unwrap()).unwrap())
            .collect();
        let q_reduced = c.dequantize(&c.quantize(&query).unwrap()).unwrap();
        let quant_best = dq
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                cosine_similarity(&q_reduced, a)
                    .partial_cmp(&cosine_similarity(&q_reduced, b))
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap();

        assert_eq!(quant_best, full_best);
    }

    #[test]
    fn cosine_similarity_basics() {
        let v1 = vec![1.0, 0.0, 0.0];
        let v2 = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v1, &v2) - 1.0).abs() < 0.001);

        let v3 = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&v1, &v3) - 0.0).abs() < 0.001);

        let v4 = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v1, &v4) - (-1.0)).abs() < 0.001);
    }
}
