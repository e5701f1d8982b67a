//! Degree metrics written onto committed nodes.
use crate::db::Db;
use crate::db::models::RelationType;
use rusqlite::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsReport {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Degree {
    fan_in: u64,
    fan_out: u64,
    calls_in: u64,
    calls_out: u64,
}

/// Adds `fan_in`, `fan_out`, `calls_in` and `calls_out` to every node of
/// the repository.
///
/// Runs in its own transaction after the graph is committed. A node with
/// unusable properties is logged and skipped; nodes and edges are never
/// removed here.
pub fn compute_metrics(db: &mut Db, repository: &str) -> Result<MetricsReport> {
    let mut degrees: HashMap<i64, Degree> = HashMap::new();
    for edge in db.list_edges(repository)? {
        let calls = u64::from(edge.relation_type == RelationType::Calls);
        let source = degrees.entry(edge.source_node_id).or_default();
        source.fan_out += 1;
        source.calls_out += calls;
        let target = degrees.entry(edge.target_node_id).or_default();
        target.fan_in += 1;
        target.calls_in += calls;
    }

    let mut report = MetricsReport::default();
    let mut updates = Vec::new();
    for (id, raw) in db.load_node_properties(repository)? {
        let mut properties = match usable_properties(&raw) {
            Ok(p) => p,
            Err(reason) => {
                warn!("Skipping metrics for node {id}: {reason}");
                report.failed += 1;
                continue;
            }
        };
        let degree = degrees.get(&id).copied().unwrap_or_default();
        properties.insert("fan_in".into(), degree.fan_in.into());
        properties.insert("fan_out".into(), degree.fan_out.into());
        properties.insert("calls_in".into(), degree.calls_in.into());
        properties.insert("calls_out".into(), degree.calls_out.into());
        updates.push((id, Value::Object(properties).to_string()));
    }

    let failed = db.write_node_properties(&updates)?;
    report.failed += failed.len();
    report.updated = updates.len() - failed.len();
    debug!(
        "Metrics for {repository}: {} updated, {} failed",
        report.updated, report.failed
    );
    Ok(report)
}

fn usable_properties(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid properties: {e}"))?;
    let Value::Object(map) = value else {
        return Err("properties are not an object".to_string());
    };
    for key in ["type", "name"] {
        if !map.get(key).is_some_and(Value::is_string) {
            return Err(format!("missing `{key}` property"));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::chunks::tests::chunk;
    use crate::db::models::{ChunkKind, NewEdge, NewNode};
    use serde_json::json;

    fn seeded() -> Db {
        let mut db = Db::open_in_memory(4).unwrap();
        let chunks = vec![
            chunk("main", ChunkKind::Function),
            chunk("helper", ChunkKind::Function),
            chunk("util", ChunkKind::Function),
        ];
        db.replace_file_chunks("repo", "a.ts", &chunks, &vec![vec![0.1; 4]; 3], || true)
            .unwrap();
        let ids: Vec<i64> = db
            .load_graph_chunks("repo", &[])
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();

        let nodes: Vec<NewNode> = ["main", "helper", "util"]
            .iter()
            .zip(&ids)
            .map(|(name, id)| NewNode {
                label: name.to_string(),
                properties: json!({"type": "function", "name": name}),
                source_chunk_id: *id,
            })
            .collect();
        let edges = vec![
            NewEdge { source: 0, target: 1, relation: RelationType::Calls },
            NewEdge { source: 0, target: 2, relation: RelationType::Imports },
            NewEdge { source: 1, target: 2, relation: RelationType::Calls },
        ];
        db.replace_graph("repo", &nodes, &edges).unwrap();
        db
    }

    fn props(db: &Db, name: &str) -> Value {
        db.list_nodes("repo")
            .unwrap()
            .into_iter()
            .find(|n| n.label == name)
            .unwrap()
            .properties
    }

    #[test]
    fn test_degrees() {
        let mut db = seeded();
        let report = compute_metrics(&mut db, "repo").unwrap();
        assert_eq!(report, MetricsReport { updated: 3, failed: 0 });

        let main = props(&db, "main");
        assert_eq!(main["fan_out"], 2);
        assert_eq!(main["calls_out"], 1);
        assert_eq!(main["fan_in"], 0);

        let util = props(&db, "util");
        assert_eq!(util["fan_in"], 2);
        assert_eq!(util["calls_in"], 1);
        assert_eq!(util["name"], "util");
    }

    #[test]
    fn test_malformed_node_is_skipped() {
        let mut db = seeded();
        db.conn
            .execute(
                "UPDATE nodes SET properties = json_remove(properties, '$.type') WHERE label = 'helper'",
                [],
            )
            .unwrap();

        let report = compute_metrics(&mut db, "repo").unwrap();
        assert_eq!(report, MetricsReport { updated: 2, failed: 1 });
        assert_eq!(db.count_nodes("repo").unwrap(), 3);
        assert_eq!(db.count_edges("repo").unwrap(), 3);
        assert!(props(&db, "helper").get("fan_in").is_none());
        assert_eq!(props(&db, "main")["fan_out"], 2);
    }

    #[test]
    fn test_usable_properties() {
        assert!(usable_properties(r#"{"type":"class","name":"A"}"#).is_ok());
        assert!(usable_properties("not json").is_err());
        assert!(usable_properties("[1]").is_err());
        assert!(usable_properties(r#"{"type":"class"}"#).is_err());
    }
}
