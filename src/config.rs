/// Configuration module for repograph.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::http::{DEFAULT_BASE_URL, DEFAULT_MODEL};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./repograph.db".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_file_timeout_secs() -> u64 {
    120
}

fn default_max_reported_errors() -> usize {
    50
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_label_max_len() -> usize {
    60
}

/// Test helpers, debug output and language decorators.
pub fn default_noise_patterns() -> Vec<String> {
    vec![
        r"^(describe|it|test|expect|beforeEach|afterEach|beforeAll|afterAll)$".to_string(),
        r"^(console\..+|print|println|debug|dbg)$".to_string(),
        r"^(staticmethod|classmethod|property|dataclass|override)$".to_string(),
    ]
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,

    /// Cap on per-file failures carried in an indexing summary.
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,

    #[serde(default)]
    pub include_tests: bool,

    /// Directory names skipped in addition to the built-in list.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Mock,
    Http,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_label_max_len")]
    pub label_max_len: usize,

    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            worker_count: default_worker_count(),
            file_timeout_secs: default_file_timeout_secs(),
            max_reported_errors: default_max_reported_errors(),
            include_tests: false,
            exclude_dirs: Vec::new(),
            embedding: EmbeddingConfig::default(),
            graph: GraphConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            base_url: default_base_url(),
            model: default_model(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label_max_len: default_label_max_len(),
            noise_patterns: default_noise_patterns(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.worker_count > 0, "worker_count must be positive");
        anyhow::ensure!(
            self.file_timeout_secs > 0,
            "file_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.graph.label_max_len > 3,
            "graph.label_max_len must leave room for the ellipsis (at least 4)"
        );
        for pattern in &self.graph.noise_patterns {
            Regex::new(pattern)
                .with_context(|| format!("invalid graph.noise_patterns entry: {pattern}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.file_timeout_secs, 120);
        assert_eq!(cfg.max_reported_errors, 50);
        assert_eq!(cfg.embedding.dimensions, 384);
        assert_eq!(cfg.embedding.provider, EmbeddingProvider::Mock);
        assert_eq!(cfg.graph.label_max_len, 60);
        assert!(!cfg.include_tests);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.db_path, "./repograph.db");
        // Only the default path gets a template
        assert!(!path.exists());
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"worker_count": 8, "embedding": {"provider": "http", "dimensions": 768}}"#,
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.embedding.provider, EmbeddingProvider::Http);
        assert_eq!(cfg.embedding.dimensions, 768);
        assert_eq!(cfg.embedding.model, DEFAULT_MODEL);
        assert_eq!(cfg.file_timeout_secs, 120);
        assert_eq!(cfg.graph.noise_patterns, default_noise_patterns());
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.worker_count, 4);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let mut cfg = Config::default();
        cfg.exclude_dirs = vec!["generated".to_string()];
        cfg.save(path.to_str().unwrap()).unwrap();

        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.exclude_dirs, vec!["generated"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.worker_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.file_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.embedding.dimensions = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.graph.label_max_len = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.graph.noise_patterns.push("(unclosed".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("noise_patterns"));
    }
}
