/// End-to-end tests for the repograph pipeline.
///
/// Source tree → scan → worker pool → chunks and vectors → graph → metrics,
/// using the tree-sitter chunker and deterministic mock embeddings.
use repograph::config::Config;
use repograph::db::models::{ErrorType, GraphEdge, GraphNode, RelationType};
use repograph::embedder::mock::MockEmbedder;
use repograph::embedder::{Embedder, EmbedderError, EmbedderFactory};
use repograph::indexer::TreeSitterChunkSource;
use repograph::pipeline::{IndexRequest, Pipeline};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const DIMS: usize = 16;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        Self { dir }
    }

    fn root(&self) -> std::path::PathBuf {
        self.dir.path().join("src")
    }

    fn write(&self, rel: &str, text: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.db_path = self.dir.path().join("index.db").to_string_lossy().into_owned();
        config.embedding.dimensions = DIMS;
        config
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::open(self.config()).unwrap()
    }
}

fn nodes(pipeline: &Pipeline, repo: &str) -> Vec<GraphNode> {
    pipeline.pool().get().unwrap().list_nodes(repo).unwrap()
}

/// Edges as `(source label, target label, relation)`, sorted.
fn edges(pipeline: &Pipeline, repo: &str) -> Vec<(String, String, RelationType)> {
    let nodes = nodes(pipeline, repo);
    let label = |id: i64| nodes.iter().find(|n| n.id == id).unwrap().label.clone();
    let raw: Vec<GraphEdge> = pipeline.pool().get().unwrap().list_edges(repo).unwrap();
    let mut out: Vec<_> = raw
        .into_iter()
        .map(|e| (label(e.source_node_id), label(e.target_node_id), e.relation_type))
        .collect();
    out.sort();
    out
}

fn chunk_count(pipeline: &Pipeline, repo: &str, file: Option<&str>) -> usize {
    pipeline.pool().get().unwrap().count_chunks(repo, file).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_two_files() {
    let ws = Workspace::new();
    ws.write("a.ts", "export function helper(){}\n");
    ws.write(
        "b.ts",
        "import {helper} from './a';\nexport function main(){ helper(); }\n",
    );
    let pipeline = ws.pipeline();

    let summary = pipeline
        .index_repository(&ws.root(), "demo", IndexRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_chunks, 2);

    let stats = pipeline.build_graph("demo", Vec::new()).await.unwrap();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.total_edges, 2);
    assert_eq!(stats.filtered_count, 0);

    let mut labels: Vec<String> = nodes(&pipeline, "demo").into_iter().map(|n| n.label).collect();
    labels.sort();
    assert_eq!(labels, vec!["helper", "main"]);
    assert_eq!(
        edges(&pipeline, "demo"),
        vec![
            ("main".to_string(), "helper".to_string(), RelationType::Calls),
            ("main".to_string(), "helper".to_string(), RelationType::Imports),
        ]
    );

    // Vectors were stored alongside the chunks
    let hits = pipeline.search_chunks("demo", "helper", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_degradation() {
    let ws = Workspace::new();
    ws.write("one.ts", "export function one() { return 1; }\n");
    ws.write("two.ts", "export function broken( {\n  return\n");
    ws.write("three.ts", "export function three() { return one(); }\n");
    let pipeline = ws.pipeline();

    let summary = pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].file_path, "two.ts");
    assert_eq!(summary.errors[0].error_type, Some(ErrorType::Parsing));

    assert_eq!(chunk_count(&pipeline, "repo", Some("one.ts")), 1);
    assert_eq!(chunk_count(&pipeline, "repo", Some("two.ts")), 0);
    assert_eq!(chunk_count(&pipeline, "repo", Some("three.ts")), 1);

    let page = pipeline.list_errors("repo", None, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.errors[0].language.as_deref(), Some("typescript"));
    let summary = pipeline.error_summary("repo").await.unwrap();
    assert_eq!(summary.get(&ErrorType::Parsing), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_invariance() {
    let ws = Workspace::new();
    for i in 0..10 {
        let body = if i == 0 {
            "export function f0() { return 0; }\n".to_string()
        } else {
            let prev = i - 1;
            format!(
                "import {{ f{prev} }} from './m{prev}';\nexport function f{i}() {{ return f{prev}() + 1; }}\nexport class C{i} {{ run() {{ return f{i}(); }} }}\n"
            )
        };
        ws.write(&format!("m{i}.ts"), &body);
    }
    let pipeline = ws.pipeline();

    let mut observed = Vec::new();
    for workers in [1, 4] {
        let request = IndexRequest {
            worker_count: Some(workers),
            ..Default::default()
        };
        let summary = pipeline.index_repository(&ws.root(), "repo", request).await.unwrap();
        assert_eq!(summary.failed, 0);
        let stats = pipeline.build_graph("repo", Vec::new()).await.unwrap();
        observed.push((summary.total_chunks, stats.total_nodes, stats.total_edges, edges(&pipeline, "repo")));
    }

    assert_eq!(observed[0], observed[1]);
    assert_eq!(observed[0].0, 1 + 9 * 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reindex_is_idempotent() {
    let ws = Workspace::new();
    ws.write("svc.py", "class Service:\n    def run(self):\n        return helper()\n\ndef helper():\n    return 1\n");
    let pipeline = ws.pipeline();

    let first = pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    let second = pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();

    assert_eq!(first.total_chunks, 3);
    assert_eq!(second.total_chunks, first.total_chunks);
    assert_eq!(chunk_count(&pipeline, "repo", None), 3);
    assert_eq!(second.cleaned.chunks, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_resolution_prefers_nearby_definitions() {
    let ws = Workspace::new();
    ws.write("b/util.ts", "export function add(a: number, b: number) { return a + b; }\n");
    ws.write("a/calc.ts", "export function add(x: number, y: number) { return x + y; }\n");
    ws.write("a/main.ts", "export function main() { return add(1, 2); }\n");
    let pipeline = ws.pipeline();
    pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();

    for _ in 0..3 {
        pipeline.build_graph("repo", Vec::new()).await.unwrap();
        let nodes = nodes(&pipeline, "repo");
        let graph_edges = pipeline.pool().get().unwrap().list_edges("repo").unwrap();
        assert_eq!(graph_edges.len(), 1);
        let target = nodes.iter().find(|n| n.id == graph_edges[0].target_node_id).unwrap();
        assert_eq!(target.file(), Some("a/calc.ts"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_noise_is_excluded_but_calls_survive() {
    let ws = Workspace::new();
    ws.write(
        "app.ts",
        r#"export function track() {}

export function setup(items: number[]) {
  items.forEach(() => {
    track();
  });
}

function describe(name: string) {
  track();
}
"#,
    );
    let pipeline = ws.pipeline();
    pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    assert_eq!(chunk_count(&pipeline, "repo", None), 4);

    let stats = pipeline.build_graph("repo", Vec::new()).await.unwrap();
    assert_eq!(stats.filtered_anonymous, 1);
    assert_eq!(stats.filtered_noise, 1);
    assert_eq!(stats.filtered_count, 2);

    let mut labels: Vec<String> = nodes(&pipeline, "repo").into_iter().map(|n| n.label).collect();
    labels.sort();
    assert_eq!(labels, vec!["setup", "track"]);
    assert_eq!(
        edges(&pipeline, "repo"),
        vec![("setup".to_string(), "track".to_string(), RelationType::Calls)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closures_never_become_nodes() {
    let ws = Workspace::new();
    ws.write(
        "py/a.py",
        "def transform(x):\n    return x\n\ndef run(items):\n    return list(map(lambda x: transform(x), items))\n",
    );
    ws.write(
        "go/a.go",
        "package a\n\nfunc transform(x int) int { return x }\n\nfunc run(items []int) {\n\tapply(items, func(x int) int { return transform(x) })\n}\n",
    );
    ws.write(
        "rs/a.rs",
        "fn transform(x: i32) -> i32 { x }\n\npub fn run(items: Vec<i32>) -> Vec<i32> {\n    items.into_iter().map(|x| transform(x)).collect()\n}\n",
    );
    ws.write(
        "ts/a.ts",
        "function transform(x: string) { return x; }\n\nexport function run(items: Array<string>) {\n  return items.map((i: Array<string>) => transform(i));\n}\n",
    );
    let pipeline = ws.pipeline();

    for language in ["python", "go", "rust", "typescript"] {
        let request = IndexRequest {
            languages: vec![language.to_string()],
            ..Default::default()
        };
        let summary = pipeline.index_repository(&ws.root(), language, request).await.unwrap();
        assert_eq!(summary.total_files, 1, "{language}");
        assert_eq!(summary.total_chunks, 3, "{language}");

        let stats = pipeline.build_graph(language, Vec::new()).await.unwrap();
        assert_eq!(stats.filtered_anonymous, 1, "{language}");
        assert_eq!(stats.placeholder_names, 0, "{language}");

        let mut labels: Vec<String> = nodes(&pipeline, language).into_iter().map(|n| n.label).collect();
        labels.sort();
        assert_eq!(labels, vec!["run", "transform"], "{language}");
        assert_eq!(
            edges(&pipeline, language),
            vec![("run".to_string(), "transform".to_string(), RelationType::Calls)],
            "{language}: the closure's call belongs to run"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reexport_chains_reach_declarations() {
    let ws = Workspace::new();
    ws.write("a.ts", "export function x() {}\nexport function y() {}\n");
    ws.write(
        "index.ts",
        "import { x } from './a';\nexport { x };\nexport { y as why } from './a';\n",
    );
    let pipeline = ws.pipeline();
    let summary = pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.total_chunks, 3);

    let stats = pipeline.build_graph("repo", Vec::new()).await.unwrap();
    assert_eq!(stats.edges_by_type.get("re_exports"), Some(&2));
    assert_eq!(stats.nodes_by_type.get("barrel"), Some(&1));
    assert_eq!(
        edges(&pipeline, "repo"),
        vec![
            ("index".to_string(), "x".to_string(), RelationType::Imports),
            ("index".to_string(), "x".to_string(), RelationType::ReExports),
            ("index".to_string(), "y".to_string(), RelationType::ReExports),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_failure_keeps_graph() {
    let ws = Workspace::new();
    ws.write("a.ts", "export function helper(){}\n");
    ws.write("b.ts", "import {helper} from './a';\nexport function main(){ helper(); }\n");
    let pipeline = ws.pipeline();
    pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    let stats = pipeline.build_graph("repo", Vec::new()).await.unwrap();
    assert_eq!(stats.metrics_failed, 0);

    let conn = rusqlite::Connection::open(&ws.config().db_path).unwrap();
    conn.execute(
        "UPDATE nodes SET properties = json_remove(properties, '$.name') WHERE label = 'helper'",
        [],
    )
    .unwrap();
    drop(conn);

    let report = pipeline.compute_metrics("repo").await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);

    let db = pipeline.pool().get().unwrap();
    assert_eq!(db.count_nodes("repo").unwrap(), 2);
    assert_eq!(db.count_edges("repo").unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clean_repository_removes_everything() {
    let ws = Workspace::new();
    ws.write("a.ts", "export function helper(){}\n");
    ws.write("bad.ts", "function (\n");
    let pipeline = ws.pipeline();
    pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    pipeline.build_graph("repo", Vec::new()).await.unwrap();

    let cleaned = pipeline.clean_repository("repo").await.unwrap();
    assert_eq!(cleaned.chunks, 1);
    assert_eq!(cleaned.vectors, 1);
    assert_eq!(cleaned.nodes, 1);
    assert_eq!(cleaned.errors, 1);

    assert_eq!(chunk_count(&pipeline, "repo", None), 0);
    assert!(nodes(&pipeline, "repo").is_empty());
    assert_eq!(pipeline.list_errors("repo", None, 10, 0).await.unwrap().total, 0);
}

/// Embeds correctly, but slower than any file is allowed to take.
struct SlowFactory;

struct SlowEmbedder(MockEmbedder);

impl Embedder for SlowEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        std::thread::sleep(Duration::from_millis(1500));
        self.0.embed(text)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

impl EmbedderFactory for SlowFactory {
    fn create(&self) -> Result<Box<dyn Embedder>, EmbedderError> {
        Ok(Box::new(SlowEmbedder(MockEmbedder::new(DIMS))))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_during_embedding() {
    let ws = Workspace::new();
    ws.write("slow.ts", "export function slow() { return 1; }\n");
    let mut config = ws.config();
    config.file_timeout_secs = 1;
    let pipeline = Pipeline::with_components(
        config,
        Arc::new(TreeSitterChunkSource::new().unwrap()),
        Arc::new(SlowFactory),
    )
    .unwrap();

    let summary = pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].error_type, Some(ErrorType::Embedding));
    assert!(summary.errors[0].message.contains("timed out"));
    assert_eq!(chunk_count(&pipeline, "repo", None), 0);

    let page = pipeline
        .list_errors("repo", Some(ErrorType::Embedding), 10, 0)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_language_is_rejected_before_cleaning() {
    let ws = Workspace::new();
    ws.write("a.ts", "export function helper(){}\n");
    let pipeline = ws.pipeline();
    pipeline
        .index_repository(&ws.root(), "repo", IndexRequest::default())
        .await
        .unwrap();

    let request = IndexRequest {
        languages: vec!["typescipt".to_string()],
        ..Default::default()
    };
    let err = pipeline.index_repository(&ws.root(), "repo", request).await.unwrap_err();
    assert!(format!("{err:#}").contains("typescipt"));
    assert!(pipeline.build_graph("repo", vec!["pyhton".to_string()]).await.is_err());

    assert_eq!(chunk_count(&pipeline, "repo", None), 1, "earlier index survives");
}

#[test]
fn test_scan_root_must_exist() {
    let ws = Workspace::new();
    let missing = ws.dir.path().join("nope");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let result = runtime.block_on(ws.pipeline().index_repository(Path::new(&missing), "repo", IndexRequest::default()));
    assert!(result.is_err());
}
