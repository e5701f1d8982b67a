/// Deterministic embedder for tests and offline indexing runs.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, EmbedderFactory};

/// Produces unit-length vectors seeded from a hash of the text.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        // xorshift keeps neighbouring dimensions decorrelated
        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            embedding.push((state % 2001) as f32 / 1000.0 - 1.0);
        }

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Hands every worker its own `MockEmbedder`.
pub struct MockEmbedderFactory {
    pub dimensions: usize,
}

impl EmbedderFactory for MockEmbedderFactory {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedderError> {
        Ok(Box::new(MockEmbedder::new(self.dimensions)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
