//! Persistent record of per-file indexing failures.
use crate::db::DbPool;
use crate::db::models::{ErrorType, IndexingError, NewIndexingError};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_TRACEBACK_CHARS: usize = 8000;

#[derive(Debug, Serialize)]
pub struct ErrorPage {
    pub errors: Vec<IndexingError>,
    pub total: usize,
}

/// Writes and reads indexing errors through a connection pool.
#[derive(Clone)]
pub struct ErrorTracker {
    pool: DbPool,
}

impl ErrorTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Records one failure. Never fails: storage problems are logged and
    /// reported as `None`.
    pub fn log(&self, error: NewIndexingError) -> Option<i64> {
        let error = NewIndexingError {
            message: truncate_chars(&error.message, MAX_MESSAGE_CHARS),
            traceback: error
                .traceback
                .as_deref()
                .map(|t| truncate_chars(t, MAX_TRACEBACK_CHARS)),
            ..error
        };

        let db = match self.pool.get() {
            Ok(db) => db,
            Err(e) => {
                error!(
                    "Could not record {} for {}: no connection: {e}",
                    error.error_type, error.file_path
                );
                return None;
            }
        };

        match db.insert_error(&error, Utc::now()) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    "Could not record {} for {}: {e}",
                    error.error_type, error.file_path
                );
                None
            }
        }
    }

    /// One page of a repository's errors, newest first.
    pub fn list(
        &self,
        repository: &str,
        error_type: Option<ErrorType>,
        limit: usize,
        offset: usize,
    ) -> Result<ErrorPage> {
        let db = self.pool.get().context("failed to get database connection")?;
        let (errors, total) = db
            .list_errors(repository, error_type, limit, offset)
            .context("failed to list indexing errors")?;
        Ok(ErrorPage { errors, total })
    }

    /// Error counts by type for a repository.
    pub fn summary(&self, repository: &str) -> Result<BTreeMap<ErrorType, usize>> {
        let db = self.pool.get().context("failed to get database connection")?;
        db.error_counts(repository)
            .context("failed to summarize indexing errors")
    }
}

/// Cuts `text` to at most `max` characters, on a character boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Renders an error and its sources, one per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
