//! Indexing orchestration: clean, scan, process in parallel, build the graph.
pub mod pool;
pub mod processor;
pub mod scan;

use crate::config::Config;
use crate::db::models::{CleanupStats, ErrorType};
use crate::db::search::ChunkHit;
use crate::db::{DbPool, open_pool};
use crate::embedder::{ConfiguredEmbedderFactory, EmbedderFactory};
use crate::graph::metrics::MetricsReport;
use crate::graph::{GraphBuilder, GraphStats};
use crate::indexer::languages::supported_languages;
use crate::indexer::{ChunkSource, TreeSitterChunkSource};
use crate::tracker::{ErrorPage, ErrorTracker, truncate_chars};
use anyhow::{Context, Result, bail};
use pool::{PoolSummary, WorkerPool};
use processor::FileProcessingResult;
use scan::{ScanOptions, scan_repository};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Connections shared by orchestration, graph building and error queries.
const SHARED_POOL_SIZE: u32 = 4;

/// Longest error message carried in an [`IndexSummary`].
pub const SUMMARY_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileFailure {
    pub file_path: String,
    pub error_type: Option<ErrorType>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub repository: String,
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_chunks: usize,
    /// At most `max_reported_errors` failures; the error log has them all.
    pub errors: Vec<FileFailure>,
    pub errors_truncated: bool,
    pub cleaned: CleanupStats,
    pub duration_ms: u64,
}

/// Options of one indexing run; `None` falls back to configuration.
#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    pub worker_count: Option<usize>,
    pub languages: Vec<String>,
    pub include_tests: Option<bool>,
}

pub struct Pipeline {
    config: Config,
    pool: DbPool,
    tracker: ErrorTracker,
    chunker: Arc<dyn ChunkSource>,
    embedders: Arc<dyn EmbedderFactory>,
    /// Indexing and graph builds of one process never overlap.
    run_lock: Mutex<()>,
}

impl Pipeline {
    /// Builds the pipeline described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let chunker = TreeSitterChunkSource::new().context("failed to load tree-sitter grammars")?;
        let embedders = ConfiguredEmbedderFactory::new(config.embedding.clone());
        Self::with_components(config, Arc::new(chunker), Arc::new(embedders))
    }

    pub fn with_components(
        config: Config,
        chunker: Arc<dyn ChunkSource>,
        embedders: Arc<dyn EmbedderFactory>,
    ) -> Result<Self> {
        let pool = open_pool(&config.db_path, embedders.dimensions(), SHARED_POOL_SIZE)
            .with_context(|| format!("failed to open database: {}", config.db_path))?;
        info!(
            "Pipeline ready: db={}, dims={}, workers={}",
            config.db_path,
            embedders.dimensions(),
            config.worker_count
        );
        Ok(Self {
            tracker: ErrorTracker::new(pool.clone()),
            config,
            pool,
            chunker,
            embedders,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    /// Re-indexes a repository from scratch: its chunks, graph and error
    /// log are removed first, then every scanned file is processed.
    pub async fn index_repository(
        &self,
        path: &Path,
        repository: &str,
        request: IndexRequest,
    ) -> Result<IndexSummary> {
        check_languages(&request.languages)?;
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let workers = request.worker_count.unwrap_or(self.config.worker_count);
        info!("Indexing {} as {repository}", path.display());

        let cleaned = self.clean(repository).await?;

        let options = ScanOptions {
            languages: request.languages,
            include_tests: request.include_tests.unwrap_or(self.config.include_tests),
            exclude_dirs: self.config.exclude_dirs.clone(),
        };
        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || scan_repository(&root, &options))
            .await
            .context("scan task panicked")?
            .with_context(|| format!("failed to scan {}", path.display()))?;

        let pool = Arc::new(WorkerPool {
            repository: repository.to_string(),
            db_path: PathBuf::from(&self.config.db_path),
            chunker: self.chunker.clone(),
            embedders: self.embedders.clone(),
            tracker: self.tracker.clone(),
            file_timeout: Duration::from_secs(self.config.file_timeout_secs),
        });
        let run = pool.run(files, workers).await;

        Ok(self.summarize(repository, run, cleaned, started))
    }

    fn summarize(
        &self,
        repository: &str,
        run: PoolSummary,
        cleaned: CleanupStats,
        started: Instant,
    ) -> IndexSummary {
        let (errors, errors_truncated) = cap_failures(&run.failures, self.config.max_reported_errors);
        IndexSummary {
            repository: repository.to_string(),
            total_files: run.total_files,
            succeeded: run.succeeded,
            failed: run.failed,
            total_chunks: run.total_chunks,
            errors,
            errors_truncated,
            cleaned,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Rebuilds the dependency graph of an indexed repository.
    pub async fn build_graph(&self, repository: &str, languages: Vec<String>) -> Result<GraphStats> {
        check_languages(&languages)?;
        let _guard = self.run_lock.lock().await;
        let mut builder = GraphBuilder::new(self.pool.clone(), self.tracker.clone(), &self.config.graph)?;
        let repository = repository.to_string();
        let stats = tokio::task::spawn_blocking(move || builder.build(&repository, &languages))
            .await
            .context("graph task panicked")??;
        Ok(stats)
    }

    /// Recomputes node metrics of an existing graph.
    pub async fn compute_metrics(&self, repository: &str) -> Result<MetricsReport> {
        let builder = GraphBuilder::new(self.pool.clone(), self.tracker.clone(), &self.config.graph)?;
        let repository = repository.to_string();
        let report = tokio::task::spawn_blocking(move || builder.compute_metrics(&repository))
            .await
            .context("metrics task panicked")??;
        Ok(report)
    }

    pub async fn list_errors(
        &self,
        repository: &str,
        error_type: Option<ErrorType>,
        limit: usize,
        offset: usize,
    ) -> Result<ErrorPage> {
        let tracker = self.tracker.clone();
        let repository = repository.to_string();
        tokio::task::spawn_blocking(move || tracker.list(&repository, error_type, limit, offset))
            .await
            .context("error listing task panicked")?
    }

    pub async fn error_summary(&self, repository: &str) -> Result<BTreeMap<ErrorType, usize>> {
        let tracker = self.tracker.clone();
        let repository = repository.to_string();
        tokio::task::spawn_blocking(move || tracker.summary(&repository))
            .await
            .context("error summary task panicked")?
    }

    /// Nearest embedded chunks to a free-text query.
    pub async fn search_chunks(&self, repository: &str, query: &str, top_k: usize) -> Result<Vec<ChunkHit>> {
        let embedders = self.embedders.clone();
        let pool = self.pool.clone();
        let repository = repository.to_string();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ChunkHit>> {
            let vector = {
                let embedder = embedders.create().context("failed to create embedder")?;
                embedder.embed(&query).context("failed to embed query")?
            };
            let db = pool.get().context("failed to get database connection")?;
            db.search_chunks(&repository, &vector, top_k)
                .context("chunk search failed")
        })
        .await
        .context("search task panicked")?
    }

    /// Removes every stored artifact of a repository.
    pub async fn clean_repository(&self, repository: &str) -> Result<CleanupStats> {
        let _guard = self.run_lock.lock().await;
        self.clean(repository).await
    }

    async fn clean(&self, repository: &str) -> Result<CleanupStats> {
        let pool = self.pool.clone();
        let repo = repository.to_string();
        let stats = tokio::task::spawn_blocking(move || -> Result<CleanupStats> {
            let mut db = pool.get().context("failed to get database connection")?;
            db.clean_repository(&repo)
                .with_context(|| format!("failed to clean repository {repo}"))
        })
        .await
        .context("cleanup task panicked")??;
        info!(
            "Cleaned {repository}: {} chunks, {} nodes, {} edges, {} errors",
            stats.chunks, stats.nodes, stats.edges, stats.errors
        );
        Ok(stats)
    }
}

/// First `cap` failures with messages cut for display.
fn cap_failures(failures: &[FileProcessingResult], cap: usize) -> (Vec<FileFailure>, bool) {
    let errors = failures
        .iter()
        .take(cap)
        .map(|f| FileFailure {
            file_path: f.file_path.clone(),
            error_type: f.error_type,
            message: truncate_chars(f.error_message.as_deref().unwrap_or_default(), SUMMARY_MESSAGE_CHARS),
        })
        .collect();
    (errors, failures.len() > cap)
}

/// Rejects language names no chunker knows, before anything is deleted.
fn check_languages(languages: &[String]) -> Result<()> {
    let supported = supported_languages();
    let unknown: Vec<&str> = languages
        .iter()
        .map(String::as_str)
        .filter(|l| !supported.contains(l))
        .collect();
    if !unknown.is_empty() {
        bail!(
            "unsupported language(s): {} (expected one of: {})",
            unknown.join(", "),
            supported.join(", ")
        );
    }
    Ok(())
}
