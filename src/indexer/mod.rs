//! Splitting source files into declaration-level chunks.
pub mod code_parser;
pub mod complexity;
pub mod languages;
pub mod relations;

use crate::db::models::{ErrorType, SourceChunk};
use thiserror::Error;

pub use code_parser::TreeSitterChunkSource;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("syntax error in {file} at line {line}")]
    Syntax { file: String, line: usize },

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("chunk extraction failed: {0}")]
    Extraction(String),

    #[error("invalid tree-sitter query: {0}")]
    Query(#[from] tree_sitter::QueryError),

    #[error("parser setup failed: {0}")]
    Language(#[from] tree_sitter::LanguageError),
}

impl ChunkError {
    /// Syntax errors are parsing failures; everything else is judged by its
    /// message and defaults to a chunking failure.
    pub fn error_type(&self) -> ErrorType {
        match self {
            ChunkError::Syntax { .. } => ErrorType::Parsing,
            other => match ErrorType::classify(&other.to_string()) {
                ErrorType::Unexpected => ErrorType::Chunking,
                t => t,
            },
        }
    }
}

/// Turns one decoded file into chunks.
///
/// Implementations are shared by every worker and must be stateless between
/// calls. An empty vector is a valid answer.
pub trait ChunkSource: Send + Sync {
    fn chunk_file(&self, file_path: &str, source: &str) -> Result<Vec<SourceChunk>, ChunkError>;
}
