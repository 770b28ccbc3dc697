//! Shared fixtures: a deterministic embedding provider and corpus helpers.

use semvec::config::Settings;
use semvec::error::EngineResult;
use semvec::provider::EmbeddingProvider;
use semvec::vector::types::VectorDimension;
use std::path::Path;
use std::time::Duration;

/// Deterministic provider: the embedding is a pure function of the text,
/// so identical text always produces identical vectors across runs.
pub struct HashProvider {
    dimension: VectorDimension,
}

impl HashProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).unwrap(),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut state = 0xcbf2_9ce4_8422_2325u64;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x100_0000_01b3);
        }

        let mut vector = Vec::with_capacity(dim);
        for i in 0..dim {
            state = state
                .wrapping_add(0x9e37_79b9_7f4a_7c15)
                .wrapping_mul(i as u64 | 1);
            state ^= state >> 31;
            // Map to [-1, 1]
            vector.push((state as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32);
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut vector {
            *x /= norm;
        }
        vector
    }
}

impl EmbeddingProvider for HashProvider {
    fn embed(&self, texts: &[&str]) -> impl Future<Output = EngineResult<Vec<Vec<f32>>>> + Send {
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        async move { Ok(vectors) }
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Same embeddings as [`HashProvider`], delivered after a delay. Lets
/// tests observe a mutation holding the collection lock mid-flight.
pub struct SlowProvider {
    inner: HashProvider,
    pub delay: Duration,
}

impl SlowProvider {
    pub fn new(dimension: usize, delay: Duration) -> Self {
        Self {
            inner: HashProvider::new(dimension),
            delay,
        }
    }
}

impl EmbeddingProvider for SlowProvider {
    fn embed(&self, texts: &[&str]) -> impl Future<Output = EngineResult<Vec<Vec<f32>>>> + Send {
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.inner.vector_for(t)).collect();
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(vectors)
        }
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }
}

/// Routes engine tracing into the test harness output.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semvec=debug".into()),
        )
        .try_init();
}

/// Settings sized for small test corpora.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.quantization.reduced_dims = 8;
    settings.ann.graph_degree = 8;
    settings.ann.build_breadth = 32;
    settings.ann.search_breadth = 32;
    settings.chunking.lines_per_chunk = 2;
    settings
}

/// Writes a corpus file, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Bumps a file's mtime so the update engine sees it as changed even when
/// the test rewrites it within the same second.
pub fn bump_mtime(root: &Path, rel: &str, seconds_ahead: u64) {
    let path = root.join(rel);
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(seconds_ahead))
        .unwrap();
}
