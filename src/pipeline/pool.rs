//! Bounded parallel indexing over isolated workers.
use super::processor::{FileProcessingResult, FileProcessor, ProgressHandle};
use super::scan::ScannedFile;
use crate::db::models::{ErrorType, NewIndexingError};
use crate::db::open_pool;
use crate::embedder::{EmbedderError, EmbedderFactory};
use crate::indexer::ChunkSource;
use crate::tracker::ErrorTracker;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, info, warn};

/// Connections per worker: one for the file transaction, one for error logging.
const WORKER_POOL_SIZE: u32 = 2;

#[derive(Error, Debug)]
enum WorkerSetupError {
    #[error("embedder unavailable: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),
}

impl WorkerSetupError {
    fn error_type(&self) -> ErrorType {
        match self {
            WorkerSetupError::Embedder(_) => ErrorType::Unexpected,
            WorkerSetupError::Pool(_) => ErrorType::Persistence,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolSummary {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_chunks: usize,
    /// Failed files, sorted by path.
    pub failures: Vec<FileProcessingResult>,
    pub duration_ms: u64,
}

/// Everything a worker needs to build its own processor.
pub struct WorkerPool {
    pub repository: String,
    pub db_path: PathBuf,
    pub chunker: Arc<dyn ChunkSource>,
    pub embedders: Arc<dyn EmbedderFactory>,
    /// Shared tracker for failures the workers cannot record themselves.
    pub tracker: ErrorTracker,
    pub file_timeout: Duration,
}

impl WorkerPool {
    /// Processes `files` with at most `worker_count` files in flight.
    ///
    /// A file that timed out keeps its slot until its blocking task has
    /// actually returned. A failing file never stops the run. The summary
    /// does not depend on scheduling order.
    pub async fn run(self: Arc<Self>, files: Vec<ScannedFile>, worker_count: usize) -> PoolSummary {
        let started = Instant::now();
        let total_files = files.len();
        let workers = worker_count.max(1).min(total_files.max(1));
        info!(
            "Indexing {} files of {} with {} workers",
            total_files, self.repository, workers
        );

        let (file_tx, file_rx) = mpsc::channel::<ScannedFile>(workers * 2);
        let file_rx = Arc::new(Mutex::new(file_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<FileProcessingResult>();
        let slots = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let pool = self.clone();
            let rx = file_rx.clone();
            let tx = result_tx.clone();
            let slots = slots.clone();
            handles.push(tokio::spawn(async move { pool.worker(id, rx, tx, slots).await }));
        }
        drop(result_tx);

        let expected: Vec<ScannedFile> = files.clone();
        let feeder = tokio::spawn(async move {
            for file in files {
                if file_tx.send(file).await.is_err() {
                    break;
                }
            }
        });

        let mut results = Vec::with_capacity(total_files);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        if let Err(e) = feeder.await {
            warn!("File feeder stopped abnormally: {e}");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Indexing worker stopped abnormally: {e}");
            }
        }
        // No abandoned task outlives the run
        if slots.acquire_many(workers as u32).await.is_err() {
            warn!("Processing slots closed before the run drained");
        }

        // Anything a dead worker left behind is still a failure of its own
        let seen: HashSet<String> = results.iter().map(|r| r.file_path.clone()).collect();
        for file in expected.iter().filter(|f| !seen.contains(&f.relative)) {
            let message = "file was never processed: indexing worker stopped";
            self.record(file, ErrorType::Unexpected, message).await;
            results.push(FileProcessingResult::failed(&file.relative, ErrorType::Unexpected, message));
        }

        let summary = summarize(results, started.elapsed());
        info!(
            "Indexed {}: {} succeeded, {} failed, {} chunks in {}ms",
            self.repository, summary.succeeded, summary.failed, summary.total_chunks, summary.duration_ms
        );
        summary
    }

    async fn worker(
        self: Arc<Self>,
        id: usize,
        files: Arc<Mutex<mpsc::Receiver<ScannedFile>>>,
        results: mpsc::UnboundedSender<FileProcessingResult>,
        slots: Arc<Semaphore>,
    ) {
        let setup = {
            let pool = self.clone();
            tokio::task::spawn_blocking(move || pool.build_processor()).await
        };
        let processor = match setup {
            Ok(Ok(processor)) => Ok(processor),
            Ok(Err(e)) => {
                warn!("Worker {id} could not start: {e}");
                Err((e.error_type(), e.to_string()))
            }
            Err(e) => Err((ErrorType::Unexpected, format!("worker setup panicked: {e}"))),
        };
        debug!("Worker {id} ready");

        loop {
            let next = { files.lock().await.recv().await };
            let Some(file) = next else { break };

            let result = match &processor {
                Ok(processor) => self.process_with_timeout(processor, file, &slots).await,
                Err((error_type, message)) => {
                    self.record(&file, *error_type, message).await;
                    FileProcessingResult::failed(&file.relative, *error_type, message.clone())
                }
            };
            if results.send(result).is_err() {
                break;
            }
        }

        // Embedders may own blocking clients that must not drop on the runtime
        if let Ok(processor) = processor {
            let _ = tokio::task::spawn_blocking(move || drop(processor)).await;
        }
        debug!("Worker {id} finished");
    }

    fn build_processor(&self) -> Result<FileProcessor, WorkerSetupError> {
        let embedder = self.embedders.create()?;
        let pool = open_pool(&self.db_path, self.embedders.dimensions(), WORKER_POOL_SIZE)?;
        Ok(FileProcessor::new(
            &self.repository,
            self.chunker.clone(),
            Arc::from(embedder),
            pool,
        ))
    }

    async fn process_with_timeout(
        &self,
        processor: &FileProcessor,
        file: ScannedFile,
        slots: &Arc<Semaphore>,
    ) -> FileProcessingResult {
        // Waits out any abandoned task still holding a slot
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let message = format!("no processing slot: {e}");
                self.record(&file, ErrorType::Unexpected, &message).await;
                return FileProcessingResult::failed(&file.relative, ErrorType::Unexpected, message);
            }
        };

        let progress = ProgressHandle::new();
        let task = {
            let processor = processor.clone();
            let progress = progress.clone();
            let file = file.clone();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                processor.process(&file, &progress)
            })
        };

        match tokio::time::timeout(self.file_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(e) => e.to_string(),
                };
                let message = format!("panic while processing file: {message}");
                warn!("{}: {}", file.relative, message);
                self.record(&file, ErrorType::Unexpected, &message).await;
                FileProcessingResult::failed(&file.relative, ErrorType::Unexpected, message)
            }
            Err(_) => {
                progress.cancel();
                let phase = progress.phase();
                let error_type = phase.timeout_error_type();
                let message = format!(
                    "timed out after {}s while {}",
                    self.file_timeout.as_secs_f64(),
                    phase.as_str()
                );
                warn!("{}: {}", file.relative, message);
                self.record(&file, error_type, &message).await;
                FileProcessingResult::failed(&file.relative, error_type, message)
            }
        }
    }

    async fn record(&self, file: &ScannedFile, error_type: ErrorType, message: &str) {
        let tracker = self.tracker.clone();
        let error = NewIndexingError {
            repository: self.repository.clone(),
            file_path: file.relative.clone(),
            error_type,
            message: message.to_string(),
            traceback: None,
            chunk_kind: None,
            language: Some(file.language.to_string()),
        };
        if let Err(e) = tokio::task::spawn_blocking(move || tracker.log(error)).await {
            warn!("Error logging task failed: {e}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn summarize(mut results: Vec<FileProcessingResult>, elapsed: Duration) -> PoolSummary {
    results.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    let mut summary = PoolSummary {
        total_files: results.len(),
        duration_ms: elapsed.as_millis() as u64,
        ..Default::default()
    };
    for result in results {
        if result.success {
            summary.succeeded += 1;
            summary.total_chunks += result.chunks_created;
        } else {
            summary.failed += 1;
            summary.failures.push(result);
        }
    }
    summary
}
