//! Dependency graph construction over persisted chunks.
//!
//! The structural pass (nodes and edges) commits as one transaction that
//! also drops the repository's previous graph. Metrics follow in a second,
//! independent transaction.
pub mod metrics;
pub mod naming;
pub mod noise;
pub mod resolver;

use crate::config::GraphConfig;
use crate::db::DbPool;
use crate::db::models::{
    ChunkKind, ChunkMetadata, ErrorType, NewEdge, NewIndexingError, NewNode, RelationType,
    StoredChunk,
};
use crate::tracker::ErrorTracker;
use metrics::{MetricsReport, compute_metrics};
use naming::{ResolvedName, make_label, resolve_kind, resolve_name};
use noise::{FilterReason, NoiseFilter};
use resolver::Resolver;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("database connection unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("graph storage failed: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid noise pattern: {0}")]
    NoisePattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Fetching,
    NodesBuilt,
    EdgesBuilt,
    MetricsComputed,
    Done,
    /// Metrics could not be written; nodes and edges are committed.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub repository: String,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub edges_by_type: BTreeMap<String, usize>,
    pub duration_ms: u64,
    pub filtered_count: usize,
    pub filtered_anonymous: usize,
    pub filtered_noise: usize,
    pub placeholder_names: usize,
    pub malformed_metadata: usize,
    pub unresolved_types: usize,
    pub unresolved_calls: usize,
    pub unresolved_imports: usize,
    pub metrics_failed: usize,
    pub phase: BuildPhase,
}

/// A chunk that passed filtering, not yet stored.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub chunk_id: i64,
    pub file_path: String,
    pub chunk_index: usize,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub name: ResolvedName,
    pub metadata: ChunkMetadata,
}

impl PlannedNode {
    fn properties(&self, repository: &str) -> Value {
        let mut properties = json!({
            "type": self.kind.as_str(),
            "name": self.name.as_str(),
            "file": self.file_path,
            "repository": repository,
            "language": self.language,
            "start_line": self.start_line,
            "end_line": self.end_line,
            "placeholder_name": self.name.is_placeholder(),
        });
        if let Some(complexity) = self.metadata.complexity {
            properties["cyclomatic_complexity"] = complexity.cyclomatic.into();
            properties["lines_of_code"] = complexity.loc.into();
        }
        properties
    }
}

/// A chunk kept out of the graph whose calls still count.
struct FilteredChunk {
    file_path: String,
    start_line: usize,
    end_line: usize,
    parent: Option<String>,
    calls: Vec<String>,
}

/// Everything decided before any edge is resolved.
#[derive(Default)]
struct Plan {
    nodes: Vec<PlannedNode>,
    filtered: Vec<FilteredChunk>,
    filtered_anonymous: usize,
    filtered_noise: usize,
    placeholder_names: usize,
    malformed_metadata: usize,
    unresolved_types: usize,
}

#[derive(Default)]
struct ResolvedEdges {
    edges: BTreeSet<NewEdge>,
    unresolved_calls: usize,
    unresolved_imports: usize,
}

pub struct GraphBuilder {
    pool: DbPool,
    tracker: ErrorTracker,
    noise: NoiseFilter,
    label_max_len: usize,
    phase: BuildPhase,
}

impl GraphBuilder {
    pub fn new(pool: DbPool, tracker: ErrorTracker, config: &GraphConfig) -> Result<Self, GraphError> {
        Ok(Self {
            pool,
            tracker,
            noise: NoiseFilter::new(&config.noise_patterns)?,
            label_max_len: config.label_max_len,
            phase: BuildPhase::Idle,
        })
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Rebuilds the graph of `repository` from its chunks. An empty
    /// `languages` slice takes every language.
    pub fn build(&mut self, repository: &str, languages: &[String]) -> Result<GraphStats, GraphError> {
        let started = Instant::now();
        self.phase = BuildPhase::Fetching;
        info!("Building graph for {repository}");

        let mut db = self.pool.get()?;
        let chunks = db.load_graph_chunks(repository, languages)?;
        debug!("Loaded {} chunks of {repository}", chunks.len());

        let plan = self.plan(repository, &chunks);
        drop(chunks);
        self.phase = BuildPhase::NodesBuilt;

        let resolved = self.resolve_edges(&plan);
        let new_nodes: Vec<NewNode> = plan
            .nodes
            .iter()
            .map(|node| NewNode {
                label: make_label(node.name.as_str(), self.label_max_len),
                properties: node.properties(repository),
                source_chunk_id: node.chunk_id,
            })
            .collect();
        let new_edges: Vec<NewEdge> = resolved.edges.into_iter().collect();

        let (_, stored_edges) = db.replace_graph(repository, &new_nodes, &new_edges)?;
        self.phase = BuildPhase::EdgesBuilt;
        info!(
            "Committed graph for {repository}: {} nodes, {} edges",
            new_nodes.len(),
            stored_edges
        );

        let metrics_failed = match compute_metrics(&mut db, repository) {
            Ok(report) => {
                self.phase = BuildPhase::MetricsComputed;
                report.failed
            }
            Err(e) => {
                error!("Metrics for {repository} failed, graph kept: {e}");
                self.phase = BuildPhase::Failed;
                new_nodes.len()
            }
        };

        let stats = GraphStats {
            repository: repository.to_string(),
            total_nodes: db.count_nodes(repository)?,
            total_edges: db.count_edges(repository)?,
            nodes_by_type: db.nodes_by_type(repository)?,
            edges_by_type: db.edges_by_type(repository)?,
            duration_ms: started.elapsed().as_millis() as u64,
            filtered_count: plan.filtered_anonymous + plan.filtered_noise,
            filtered_anonymous: plan.filtered_anonymous,
            filtered_noise: plan.filtered_noise,
            placeholder_names: plan.placeholder_names,
            malformed_metadata: plan.malformed_metadata,
            unresolved_types: plan.unresolved_types,
            unresolved_calls: resolved.unresolved_calls,
            unresolved_imports: resolved.unresolved_imports,
            metrics_failed,
            phase: if self.phase == BuildPhase::Failed {
                BuildPhase::Failed
            } else {
                BuildPhase::Done
            },
        };
        self.phase = stats.phase;

        info!(
            "Graph for {repository}: {} nodes, {} edges, {} filtered, {}ms",
            stats.total_nodes, stats.total_edges, stats.filtered_count, stats.duration_ms
        );
        Ok(stats)
    }

    /// Recomputes degree metrics without touching structure.
    pub fn compute_metrics(&self, repository: &str) -> Result<MetricsReport, GraphError> {
        let mut db = self.pool.get()?;
        Ok(compute_metrics(&mut db, repository)?)
    }

    // ── Nodes ────────────────────────────────────────────────────────

    fn plan(&self, repository: &str, chunks: &[StoredChunk]) -> Plan {
        let mut plan = Plan::default();

        for chunk in chunks {
            let metadata: ChunkMetadata = match serde_json::from_str(&chunk.metadata) {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        "Skipping chunk {} of {}: malformed metadata: {e}",
                        chunk.chunk_index, chunk.file_path
                    );
                    plan.malformed_metadata += 1;
                    continue;
                }
            };

            let Some(kind) = resolve_kind(&metadata, &chunk.kind) else {
                plan.unresolved_types += 1;
                self.report_unresolved_type(repository, chunk, &metadata);
                continue;
            };

            let name = resolve_name(&metadata, kind.as_str(), chunk.chunk_index);
            match self.noise.classify(kind, &name) {
                Some(reason) => {
                    match reason {
                        FilterReason::Anonymous => plan.filtered_anonymous += 1,
                        FilterReason::Noise => plan.filtered_noise += 1,
                    }
                    debug!(
                        "Filtered {} chunk {} of {} ({:?})",
                        kind,
                        chunk.chunk_index,
                        chunk.file_path,
                        reason
                    );
                    plan.filtered.push(FilteredChunk {
                        file_path: chunk.file_path.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        parent: metadata.parent.clone(),
                        calls: metadata.calls,
                    });
                }
                None => {
                    if name.is_placeholder() {
                        plan.placeholder_names += 1;
                    }
                    plan.nodes.push(PlannedNode {
                        chunk_id: chunk.id,
                        file_path: chunk.file_path.clone(),
                        chunk_index: chunk.chunk_index,
                        language: chunk.language.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        kind,
                        name,
                        metadata,
                    });
                }
            }
        }

        plan
    }

    fn report_unresolved_type(&self, repository: &str, chunk: &StoredChunk, metadata: &ChunkMetadata) {
        let declared = metadata.kind.as_deref().unwrap_or(&chunk.kind);
        let message = format!(
            "chunk {} has no resolvable node type (declared '{declared}'); not stored in graph",
            chunk.chunk_index
        );
        warn!("{}: {message}", chunk.file_path);
        self.tracker.log(NewIndexingError {
            repository: repository.to_string(),
            file_path: chunk.file_path.clone(),
            error_type: ErrorType::Persistence,
            message,
            traceback: None,
            chunk_kind: Some(chunk.kind.clone()),
            language: Some(chunk.language.clone()),
        });
    }

    // ── Edges ────────────────────────────────────────────────────────

    fn resolve_edges(&self, plan: &Plan) -> ResolvedEdges {
        let resolver = Resolver::new(&plan.nodes, &self.noise);
        let mut out = ResolvedEdges::default();

        // Calls of filtered chunks move to the node that encloses them
        let mut adopted: Vec<Vec<&str>> = vec![Vec::new(); plan.nodes.len()];
        for filtered in &plan.filtered {
            if filtered.calls.is_empty() {
                continue;
            }
            match resolver.enclosing_node(
                &filtered.file_path,
                filtered.start_line,
                filtered.end_line,
                filtered.parent.as_deref(),
            ) {
                Some(owner) => adopted[owner].extend(filtered.calls.iter().map(String::as_str)),
                None => out.unresolved_calls += filtered.calls.len(),
            }
        }

        let mut add = |source: usize, target: usize, relation: RelationType| {
            if source != target {
                out.edges.insert(NewEdge {
                    source,
                    target,
                    relation,
                });
            }
        };

        let mut unresolved_calls = 0;
        let mut unresolved_imports = 0;
        for (i, node) in plan.nodes.iter().enumerate() {
            let calls = node.metadata.calls.iter().map(String::as_str).chain(adopted[i].iter().copied());
            for callee in calls {
                match resolver.resolve_call(i, callee) {
                    Some(target) => add(i, target, RelationType::Calls),
                    None => unresolved_calls += 1,
                }
            }

            for specifier in &node.metadata.imports {
                match resolver.resolve_import(i, specifier) {
                    Some(target) => add(i, target, RelationType::Imports),
                    None => unresolved_imports += 1,
                }
            }

            for entry in node.metadata.exports.iter().filter(|e| e.contains(" from ")) {
                match resolver.resolve_reexport(i, entry) {
                    Some(target) => add(i, target, RelationType::ReExports),
                    None => unresolved_imports += 1,
                }
            }
        }

        out.unresolved_calls += unresolved_calls;
        out.unresolved_imports += unresolved_imports;
        out
    }
}
