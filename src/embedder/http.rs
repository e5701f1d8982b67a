/// Embedder backed by an Ollama-compatible `/api/embeddings` endpoint.
///
/// Uses the blocking reqwest client; it must be created, used and dropped on
/// a blocking thread, never directly on the async runtime.
use std::time::Duration;

use super::{Embedder, EmbedderError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

pub struct HttpEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::blocking::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, dimensions: usize) -> Result<Self, EmbedderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("http client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            client,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbedderError::Request(format!(
                "embedding endpoint returned status {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| EmbedderError::InferenceFailed(format!("response parse error: {e}")))?;

        let values = json
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                EmbedderError::InferenceFailed("missing 'embedding' field in response".into())
            })?;

        values
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    EmbedderError::InferenceFailed("non-numeric embedding value".into())
                })
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
