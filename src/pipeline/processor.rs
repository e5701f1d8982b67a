//! Single-file indexing: read, decode, chunk, embed and persist atomically.
use super::scan::ScannedFile;
use crate::db::DbPool;
use crate::db::chunks::ReplaceOutcome;
use crate::db::models::{ErrorType, NewIndexingError};
use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::{ChunkError, ChunkSource};
use crate::tracker::{ErrorTracker, error_chain};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

// ── Progress ─────────────────────────────────────────────────────────

/// Stage a file is in; used to classify timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Reading = 0,
    Chunking = 1,
    Embedding = 2,
    Persisting = 3,
    Done = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Reading,
            1 => Phase::Chunking,
            2 => Phase::Embedding,
            3 => Phase::Persisting,
            _ => Phase::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Reading => "reading",
            Phase::Chunking => "chunking",
            Phase::Embedding => "embedding",
            Phase::Persisting => "persisting",
            Phase::Done => "done",
        }
    }

    /// Error type recorded when a file runs out of time in this phase.
    pub fn timeout_error_type(&self) -> ErrorType {
        match self {
            Phase::Reading | Phase::Chunking => ErrorType::Chunking,
            Phase::Embedding => ErrorType::Embedding,
            Phase::Persisting | Phase::Done => ErrorType::Persistence,
        }
    }
}

/// Shared between a running file and whoever supervises it.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    phase: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(Phase::Reading as u8)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ── Errors and results ───────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to read file: {0}")]
    Read(#[source] std::io::Error),

    #[error("file is not valid UTF-8: {0}")]
    Encoding(#[source] std::string::FromUtf8Error),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("embedding failed for chunk {index}: {source}")]
    Embedding {
        index: usize,
        #[source]
        source: EmbedderError,
    },

    #[error("embedding for chunk {index} has {actual} dimensions, expected {expected}")]
    Dimensions {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("storage transaction failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database connection unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("processing cancelled")]
    Cancelled,
}

impl ProcessError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            ProcessError::Encoding(_) => ErrorType::Encoding,
            ProcessError::Chunk(e) => e.error_type(),
            ProcessError::Embedding { .. } | ProcessError::Dimensions { .. } => ErrorType::Embedding,
            ProcessError::Storage(_) | ProcessError::Pool(_) => ErrorType::Persistence,
            ProcessError::Read(_) | ProcessError::Cancelled => ErrorType::classify(&self.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProcessingResult {
    pub file_path: String,
    pub success: bool,
    pub chunks_created: usize,
    pub error_message: Option<String>,
    pub error_type: Option<ErrorType>,
}

impl FileProcessingResult {
    pub fn succeeded(file_path: &str, chunks_created: usize) -> Self {
        Self {
            file_path: file_path.to_string(),
            success: true,
            chunks_created,
            error_message: None,
            error_type: None,
        }
    }

    pub fn failed(file_path: &str, error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.to_string(),
            success: false,
            chunks_created: 0,
            error_message: Some(message.into()),
            error_type: Some(error_type),
        }
    }
}

// ── Processor ────────────────────────────────────────────────────────

/// Indexes one file at a time with a worker's own embedder and connections.
///
/// Cloning is cheap; every field is shared.
#[derive(Clone)]
pub struct FileProcessor {
    repository: Arc<str>,
    chunker: Arc<dyn ChunkSource>,
    embedder: Arc<dyn Embedder>,
    pool: DbPool,
    tracker: ErrorTracker,
}

impl FileProcessor {
    pub fn new(
        repository: &str,
        chunker: Arc<dyn ChunkSource>,
        embedder: Arc<dyn Embedder>,
        pool: DbPool,
    ) -> Self {
        Self {
            repository: Arc::from(repository),
            tracker: ErrorTracker::new(pool.clone()),
            chunker,
            embedder,
            pool,
        }
    }

    /// Runs the file to completion. Failures are recorded in the error log
    /// and leave no chunk rows behind for the file; a cancelled file is left
    /// for the supervisor to record.
    pub fn process(&self, file: &ScannedFile, progress: &ProgressHandle) -> FileProcessingResult {
        debug!("Processing {}", file.relative);

        let outcome = self.try_process(file, progress);
        progress.set_phase(Phase::Done);

        match outcome {
            Ok(chunks) => {
                debug!("Indexed {} ({} chunks)", file.relative, chunks);
                FileProcessingResult::succeeded(&file.relative, chunks)
            }
            Err(ProcessError::Cancelled) => {
                FileProcessingResult::failed(&file.relative, ErrorType::Unexpected, "processing cancelled")
            }
            Err(e) if progress.is_cancelled() => {
                // The supervisor already recorded the timeout
                self.purge(file);
                FileProcessingResult::failed(&file.relative, e.error_type(), e.to_string())
            }
            Err(e) => {
                let error_type = e.error_type();
                warn!("Failed to index {} ({}): {}", file.relative, error_type, e);
                self.purge(file);
                self.tracker.log(NewIndexingError {
                    repository: self.repository.to_string(),
                    file_path: file.relative.clone(),
                    error_type,
                    message: e.to_string(),
                    traceback: Some(error_chain(&e)),
                    chunk_kind: None,
                    language: Some(file.language.to_string()),
                });
                FileProcessingResult::failed(&file.relative, error_type, e.to_string())
            }
        }
    }

    fn try_process(&self, file: &ScannedFile, progress: &ProgressHandle) -> Result<usize, ProcessError> {
        progress.set_phase(Phase::Reading);
        let bytes = std::fs::read(&file.path).map_err(ProcessError::Read)?;
        let source = String::from_utf8(bytes).map_err(ProcessError::Encoding)?;
        if progress.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        progress.set_phase(Phase::Chunking);
        let chunks = self.chunker.chunk_file(&file.relative, &source)?;
        drop(source);

        progress.set_phase(Phase::Embedding);
        let expected = self.embedder.dimensions();
        let mut embeddings = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            if progress.is_cancelled() {
                return Err(ProcessError::Cancelled);
            }
            let vector = self
                .embedder
                .embed(&chunk.embedding_text())
                .map_err(|source| ProcessError::Embedding { index, source })?;
            if vector.len() != expected {
                return Err(ProcessError::Dimensions {
                    index,
                    expected,
                    actual: vector.len(),
                });
            }
            embeddings.push(vector);
        }

        progress.set_phase(Phase::Persisting);
        let mut db = self.pool.get()?;
        match db.replace_file_chunks(
            &self.repository,
            &file.relative,
            &chunks,
            &embeddings,
            || !progress.is_cancelled(),
        )? {
            ReplaceOutcome::Committed(count) => Ok(count),
            ReplaceOutcome::Abandoned => Err(ProcessError::Cancelled),
        }
    }

    /// Best effort: a failed file must not keep rows from an earlier run.
    fn purge(&self, file: &ScannedFile) {
        let purged = self
            .pool
            .get()
            .map_err(|e| e.to_string())
            .and_then(|mut db| {
                db.delete_file_chunks(&self.repository, &file.relative)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = purged {
            warn!("Could not clear chunks of failed file {}: {e}", file.relative);
        }
    }
}
