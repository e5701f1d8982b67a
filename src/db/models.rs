use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a stored string does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

// ── Chunk kinds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Class,
    Method,
    Function,
    Interface,
    Module,
    Config,
    Barrel,
    Unknown,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 8] = [
        ChunkKind::Class,
        ChunkKind::Method,
        ChunkKind::Function,
        ChunkKind::Interface,
        ChunkKind::Module,
        ChunkKind::Config,
        ChunkKind::Barrel,
        ChunkKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Function => "function",
            ChunkKind::Interface => "interface",
            ChunkKind::Module => "module",
            ChunkKind::Config => "config",
            ChunkKind::Barrel => "barrel",
            ChunkKind::Unknown => "unknown",
        }
    }

    /// Functions and methods, the only kinds that can be anonymous closures.
    pub fn is_callable(&self) -> bool {
        matches!(self, ChunkKind::Function | ChunkKind::Method)
    }

    /// Kinds that stand for a whole file when it is the target of an import.
    pub fn is_module_like(&self) -> bool {
        matches!(self, ChunkKind::Module | ChunkKind::Barrel)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ChunkKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| UnknownVariant {
                what: "chunk kind",
                value: s.to_string(),
            })
    }
}

// ── Relation types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Calls,
    Imports,
    ReExports,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Calls => "calls",
            RelationType::Imports => "imports",
            RelationType::ReExports => "re_exports",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calls" => Ok(RelationType::Calls),
            "imports" => Ok(RelationType::Imports),
            "re_exports" => Ok(RelationType::ReExports),
            other => Err(UnknownVariant {
                what: "relation type",
                value: other.to_string(),
            }),
        }
    }
}

// ── Error taxonomy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "encoding_error")]
    Encoding,
    #[serde(rename = "parsing_error")]
    Parsing,
    #[serde(rename = "chunking_error")]
    Chunking,
    #[serde(rename = "embedding_error")]
    Embedding,
    #[serde(rename = "persistence_error")]
    Persistence,
    #[serde(rename = "unexpected")]
    Unexpected,
}

impl ErrorType {
    pub const ALL: [ErrorType; 6] = [
        ErrorType::Encoding,
        ErrorType::Parsing,
        ErrorType::Chunking,
        ErrorType::Embedding,
        ErrorType::Persistence,
        ErrorType::Unexpected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Encoding => "encoding_error",
            ErrorType::Parsing => "parsing_error",
            ErrorType::Chunking => "chunking_error",
            ErrorType::Embedding => "embedding_error",
            ErrorType::Persistence => "persistence_error",
            ErrorType::Unexpected => "unexpected",
        }
    }

    /// Infer an error type from a free-form failure message.
    ///
    /// Checked in order: parse/syntax, chunk, embedding, storage. Anything
    /// else is `unexpected`.
    pub fn classify(message: &str) -> ErrorType {
        let lower = message.to_lowercase();
        if lower.contains("parse") || lower.contains("syntax") {
            ErrorType::Parsing
        } else if lower.contains("chunk") {
            ErrorType::Chunking
        } else if lower.contains("embed") {
            ErrorType::Embedding
        } else if ["storage", "database", "sqlite", "transaction"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            ErrorType::Persistence
        } else {
            ErrorType::Unexpected
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                what: "error type",
                value: s.to_string(),
            })
    }
}

// ── Chunk metadata ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complexity {
    pub cyclomatic: u32,
    pub loc: u32,
}

/// `name` of a chunk the chunker knows to be a callback, lambda or closure.
pub const ANONYMOUS_NAME: &str = "<anonymous>";

/// Free-form metadata bag attached to every chunk, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Overrides the declared kind when present.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Name of the enclosing declaration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_hints: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

/// A chunk as produced by a chunk source, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceChunk {
    pub kind: ChunkKind,
    pub language: String,
    pub source_text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
}

impl SourceChunk {
    /// Text handed to the embedder: `language name: source`.
    pub fn embedding_text(&self) -> String {
        match self.metadata.name.as_deref() {
            Some(name) => format!("{} {}: {}", self.language, name, self.source_text),
            None => format!("{}: {}", self.language, self.source_text),
        }
    }
}

/// A persisted chunk row, as read back by the graph builder.
///
/// `kind` and `metadata` stay raw so malformed rows can be reported instead
/// of failing the whole read.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: i64,
    pub repository: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub kind: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: String,
}

// ── Graph rows ───────────────────────────────────────────────────────

/// A node ready to be inserted; `properties` is already a JSON object.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub label: String,
    pub properties: serde_json::Value,
    pub source_chunk_id: i64,
}

/// An edge between two entries of the accompanying `NewNode` slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NewEdge {
    pub source: usize,
    pub target: usize,
    pub relation: RelationType,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: i64,
    pub repository: String,
    pub label: String,
    pub properties: serde_json::Value,
    pub source_chunk_id: Option<i64>,
}

impl GraphNode {
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(|v| v.as_str())
    }

    pub fn file(&self) -> Option<&str> {
        self.properties.get("file").and_then(|v| v.as_str())
    }

    pub fn node_type(&self) -> Option<&str> {
        self.properties.get("type").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub id: i64,
    pub source_node_id: i64,
    pub target_node_id: i64,
    pub relation_type: RelationType,
    pub repository: String,
}

// ── Indexing errors ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewIndexingError {
    pub repository: String,
    pub file_path: String,
    pub error_type: ErrorType,
    pub message: String,
    pub traceback: Option<String>,
    pub chunk_kind: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexingError {
    pub id: i64,
    pub repository: String,
    pub file_path: String,
    pub error_type: ErrorType,
    pub message: String,
    pub traceback: Option<String>,
    pub chunk_kind: Option<String>,
    pub language: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Row counts removed by a repository cleanup.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub edges: usize,
    pub nodes: usize,
    pub vectors: usize,
    pub chunks: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_kind_parse() {
        assert_eq!("class".parse::<ChunkKind>().unwrap(), ChunkKind::Class);
        assert_eq!(" Barrel ".parse::<ChunkKind>().unwrap(), ChunkKind::Barrel);
        assert!("widget".parse::<ChunkKind>().is_err());
        assert!("".parse::<ChunkKind>().is_err());
    }

    #[test]
    fn test_error_type_serde_names() {
        let json = serde_json::to_string(&ErrorType::Persistence).unwrap();
        assert_eq!(json, "\"persistence_error\"");
        for t in ErrorType::ALL {
            assert_eq!(t.as_str().parse::<ErrorType>().unwrap(), t);
        }
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(ErrorType::classify("Syntax error at line 3"), ErrorType::Parsing);
        assert_eq!(ErrorType::classify("failed to parse module"), ErrorType::Parsing);
        assert_eq!(ErrorType::classify("chunk too large"), ErrorType::Chunking);
        assert_eq!(ErrorType::classify("Embedding service down"), ErrorType::Embedding);
        assert_eq!(
            ErrorType::classify("database is locked"),
            ErrorType::Persistence
        );
        assert_eq!(ErrorType::classify("index out of bounds"), ErrorType::Unexpected);
    }

    #[test]
    fn test_metadata_defaults_and_type_rename() {
        let meta: ChunkMetadata =
            serde_json::from_str(r#"{"name":"helper","type":"function","calls":["a"]}"#).unwrap();
        assert_eq!(meta.name.as_deref(), Some("helper"));
        assert_eq!(meta.kind.as_deref(), Some("function"));
        assert_eq!(meta.calls, vec!["a"]);
        assert!(meta.imports.is_empty());
        assert!(!meta.is_async);

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("imports").is_none());
        assert_eq!(json["type"], "function");
    }

    #[test]
    fn test_embedding_text() {
        let chunk = SourceChunk {
            kind: ChunkKind::Function,
            language: "typescript".into(),
            source_text: "function f() {}".into(),
            start_line: 1,
            end_line: 1,
            metadata: ChunkMetadata {
                name: Some("f".into()),
                ..Default::default()
            },
        };
        assert_eq!(chunk.embedding_text(), "typescript f: function f() {}");
    }
}
