/// MCP tool handlers for repograph.
///
/// 1. index_repository – clean, scan and index a source tree
/// 2. build_graph      – rebuild the dependency graph of a repository
/// 3. compute_metrics  – recompute node degree metrics
/// 4. list_errors      – page through recorded indexing errors
/// 5. error_summary    – error counts by type
/// 6. clean_repository – delete everything stored for a repository
/// 7. search_chunks    – nearest embedded chunks to a query
use crate::db::models::ErrorType;
use crate::mcp::server::McpContext;
use crate::pipeline::IndexRequest;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_ERROR_PAGE: usize = 20;
const MAX_ERROR_PAGE: usize = 500;
const DEFAULT_TOP_K: usize = 5;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct IndexRepositoryParams {
    /// Root directory of the source tree
    path: String,
    /// Repository name the results are stored under
    repository: String,
    /// Parallel workers (default: from config)
    worker_count: Option<usize>,
    /// Languages to index: go | python | typescript | javascript | rust (all if omitted)
    languages: Option<Vec<String>>,
    /// Also index test files (default: from config)
    include_tests: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
struct BuildGraphParams {
    /// Repository name
    repository: String,
    /// Languages to include (all if omitted)
    languages: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
struct RepositoryParam {
    /// Repository name
    repository: String,
}

#[derive(Deserialize, JsonSchema)]
struct ListErrorsParams {
    /// Repository name
    repository: String,
    /// encoding_error | parsing_error | chunking_error | embedding_error | persistence_error | unexpected
    error_type: Option<String>,
    /// Page size (default: 20)
    limit: Option<usize>,
    /// Rows to skip (default: 0)
    offset: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct SearchParams {
    /// Repository name
    repository: String,
    /// Free-text query
    query: String,
    /// Max results (default: 5)
    top_k: Option<usize>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Renders an `anyhow` error with its causes on one line.
fn failure(action: &str, e: anyhow::Error) -> Result<CallToolResult, McpError> {
    error_result(&format!("{action} failed: {e:#}"))
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Index a source tree: removes the repository's previous chunks, graph and errors, then chunks, embeds and stores every supported file. Failing files are reported, never abort the run."
    )]
    async fn index_repository(
        &self,
        params: Parameters<IndexRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.repository.trim().is_empty() {
            return error_result("repository is required");
        }
        let path = Path::new(&p.path);
        if !path.is_dir() {
            return error_result(&format!("not a directory: {}", p.path));
        }

        let request = IndexRequest {
            worker_count: p.worker_count,
            languages: p.languages.unwrap_or_default(),
            include_tests: p.include_tests,
        };
        match self
            .ctx
            .pipeline
            .index_repository(path, &p.repository, request)
            .await
        {
            Ok(summary) => json_result(&summary),
            Err(e) => failure("indexing", e),
        }
    }

    #[tool(
        description = "Rebuild the dependency graph (nodes, calls/imports/re_exports edges, metrics) of an indexed repository"
    )]
    async fn build_graph(&self, params: Parameters<BuildGraphParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .ctx
            .pipeline
            .build_graph(&p.repository, p.languages.unwrap_or_default())
            .await
        {
            Ok(stats) => json_result(&stats),
            Err(e) => failure("graph build", e),
        }
    }

    #[tool(description = "Recompute fan-in/fan-out metrics of a repository's existing graph")]
    async fn compute_metrics(&self, params: Parameters<RepositoryParam>) -> Result<CallToolResult, McpError> {
        match self.ctx.pipeline.compute_metrics(&params.0.repository).await {
            Ok(report) => json_result(&report),
            Err(e) => failure("metrics", e),
        }
    }

    #[tool(description = "List recorded indexing errors of a repository, newest first")]
    async fn list_errors(&self, params: Parameters<ListErrorsParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let error_type = match p.error_type.as_deref().map(str::parse::<ErrorType>) {
            None => None,
            Some(Ok(t)) => Some(t),
            Some(Err(e)) => return error_result(&e.to_string()),
        };
        let limit = p.limit.unwrap_or(DEFAULT_ERROR_PAGE).clamp(1, MAX_ERROR_PAGE);

        match self
            .ctx
            .pipeline
            .list_errors(&p.repository, error_type, limit, p.offset.unwrap_or(0))
            .await
        {
            Ok(page) => json_result(&page),
            Err(e) => failure("listing errors", e),
        }
    }

    #[tool(description = "Count a repository's indexing errors by type")]
    async fn error_summary(&self, params: Parameters<RepositoryParam>) -> Result<CallToolResult, McpError> {
        match self.ctx.pipeline.error_summary(&params.0.repository).await {
            Ok(counts) => json_result(&counts),
            Err(e) => failure("error summary", e),
        }
    }

    #[tool(description = "Delete all chunks, vectors, graph data and errors stored for a repository")]
    async fn clean_repository(&self, params: Parameters<RepositoryParam>) -> Result<CallToolResult, McpError> {
        match self.ctx.pipeline.clean_repository(&params.0.repository).await {
            Ok(stats) => json_result(&stats),
            Err(e) => failure("cleanup", e),
        }
    }

    #[tool(description = "Find the indexed chunks closest in meaning to a query")]
    async fn search_chunks(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }
        let top_k = p.top_k.unwrap_or(DEFAULT_TOP_K).max(1);
        match self.ctx.pipeline.search_chunks(&p.repository, &p.query, top_k).await {
            Ok(hits) => json_result(&serde_json::json!({ "results": hits })),
            Err(e) => failure("search", e),
        }
    }
}
