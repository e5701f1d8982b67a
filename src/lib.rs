//! # repograph: code indexing pipeline and dependency graph
//!
//! Splits a source tree into semantic chunks, embeds and stores them
//! atomically per file, then links the stored chunks into a call/import
//! graph. Everything is served to assistants over the Model Context
//! Protocol (MCP).
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration with defaults and validation
//! - **[`db`]**: SQLite + sqlite-vec store for chunks, vectors, graph and errors
//! - **[`embedder`]**: embedder trait, per-worker factories, mock and HTTP clients
//! - **[`indexer`]**: tree-sitter chunking with call/import/re-export extraction
//! - **[`pipeline`]**: file scanning, per-file processing and the worker pool
//! - **[`graph`]**: node filtering, reference resolution and metrics
//! - **[`tracker`]**: persistent per-file error log
//! - **[`mcp`]**: MCP tool server (stdio transport via rmcp)

pub mod config;
pub mod db;
pub mod embedder;
pub mod graph;
pub mod indexer;
pub mod mcp;
pub mod pipeline;
pub mod tracker;
