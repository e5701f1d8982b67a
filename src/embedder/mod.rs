/// Embedder trait, per-worker factories and shared types for text embedding.
pub mod http;
pub mod mock;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding inference failed: {0}")]
    InferenceFailed(String),

    #[error("embedding model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("embedding request failed: {0}")]
    Request(String),
}

/// Trait for text embedding implementations.
///
/// An instance may hold model sessions or HTTP clients; workers never share
/// one, each builds its own through an [`EmbedderFactory`].
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Creates one embedder per worker.
pub trait EmbedderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedderError>;

    fn dimensions(&self) -> usize;
}

/// Factory driven by the `embedding` section of the configuration.
pub struct ConfiguredEmbedderFactory {
    config: EmbeddingConfig,
}

impl ConfiguredEmbedderFactory {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

impl EmbedderFactory for ConfiguredEmbedderFactory {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedderError> {
        match self.config.provider {
            EmbeddingProvider::Mock => Ok(Box::new(mock::MockEmbedder::new(self.config.dimensions))),
            EmbeddingProvider::Http => Ok(Box::new(http::HttpEmbedder::new(
                &self.config.base_url,
                &self.config.model,
                self.config.dimensions,
            )?)),
        }
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_factory_builds_independent_mocks() {
        let factory = ConfiguredEmbedderFactory::new(EmbeddingConfig {
            provider: EmbeddingProvider::Mock,
            dimensions: 16,
            ..Default::default()
        });
        let a = factory.create().unwrap();
        let b = factory.create().unwrap();
        assert_eq!(factory.dimensions(), 16);
        assert_eq!(a.dimensions(), 16);
        assert_eq!(a.embed("x").unwrap(), b.embed("x").unwrap());
    }
}
