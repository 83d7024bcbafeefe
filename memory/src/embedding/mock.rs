use async_trait::async_trait;
use mk_core::traits::EmbeddingService;
use xxhash_rust::xxh64::xxh64;

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets and the resulting count vector is L2-normalized, so texts sharing
/// words score a higher cosine similarity. Stable across runs and platforms.
pub struct MockEmbeddingService {
    dimension: usize,
}

impl MockEmbeddingService {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn generate_mock_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (xxh64(token.as_bytes(), 0) % self.dimension as u64) as usize;
            embedding[bucket] += 1.0;
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        Ok(self.generate_mock_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
