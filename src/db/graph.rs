use super::{Db, models::*};
use rusqlite::{Result, Row, TransactionBehavior, params};
use std::collections::BTreeMap;
use tracing::warn;

fn map_node(row: &Row<'_>) -> Result<GraphNode> {
    let raw: String = row.get(3)?;
    Ok(GraphNode {
        id: row.get(0)?,
        repository: row.get(1)?,
        label: row.get(2)?,
        properties: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        source_chunk_id: row.get(4)?,
    })
}

fn map_edge(row: &Row<'_>) -> Result<GraphEdge> {
    let relation: String = row.get(3)?;
    let relation_type = relation.parse::<RelationType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(GraphEdge {
        id: row.get(0)?,
        source_node_id: row.get(1)?,
        target_node_id: row.get(2)?,
        relation_type,
        repository: row.get(4)?,
    })
}

impl Db {
    /// Swaps the repository's graph for `nodes` and `edges` in one transaction.
    ///
    /// Edge endpoints index into `nodes`. Either the whole new graph becomes
    /// visible or the previous one stays untouched. Returns the new node ids
    /// (parallel to `nodes`) and the number of edges stored.
    pub fn replace_graph(
        &mut self,
        repository: &str,
        nodes: &[NewNode],
        edges: &[NewEdge],
    ) -> Result<(Vec<i64>, usize)> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM edges WHERE repository = ?", params![repository])?;
        tx.execute("DELETE FROM nodes WHERE repository = ?", params![repository])?;

        let mut node_ids = Vec::with_capacity(nodes.len());
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO nodes (repository, label, properties, source_chunk_id, embedding)
                VALUES (?1, ?2, ?3, ?4, (SELECT embedding FROM vec_chunks WHERE rowid = ?4))
                "#,
            )?;
            for node in nodes {
                insert.execute(params![
                    repository,
                    node.label,
                    node.properties.to_string(),
                    node.source_chunk_id,
                ])?;
                node_ids.push(tx.last_insert_rowid());
            }
        }

        let mut stored = 0;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT OR IGNORE INTO edges (source_node_id, target_node_id, relation_type, repository)
                VALUES (?, ?, ?, ?)
                "#,
            )?;
            for edge in edges {
                let (Some(source), Some(target)) =
                    (node_ids.get(edge.source), node_ids.get(edge.target))
                else {
                    warn!("Skipping edge with out-of-range endpoint: {:?}", edge);
                    continue;
                };
                stored += insert.execute(params![
                    source,
                    target,
                    edge.relation.as_str(),
                    repository
                ])?;
            }
        }

        tx.commit()?;
        Ok((node_ids, stored))
    }

    /// Returns `(node id, raw properties)` for every node of a repository.
    pub fn load_node_properties(&self, repository: &str) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, properties FROM nodes WHERE repository = ? ORDER BY id")?;
        let rows = stmt.query_map(params![repository], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes node properties in one transaction, isolating each node.
    ///
    /// A failing node rolls back to its own savepoint only. Returns the ids
    /// that could not be written.
    pub fn write_node_properties(&mut self, updates: &[(i64, String)]) -> Result<Vec<i64>> {
        let mut tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut failed = Vec::new();

        for (id, properties) in updates {
            let sp = tx.savepoint()?;
            match sp.execute(
                "UPDATE nodes SET properties = json(?) WHERE id = ?",
                params![properties, id],
            ) {
                Ok(_) => sp.commit()?,
                Err(e) => {
                    warn!("Failed to write properties of node {id}: {e}");
                    failed.push(*id);
                }
            }
        }

        tx.commit()?;
        Ok(failed)
    }

    pub fn list_nodes(&self, repository: &str) -> Result<Vec<GraphNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, repository, label, properties, source_chunk_id FROM nodes WHERE repository = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![repository], map_node)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    pub fn list_edges(&self, repository: &str) -> Result<Vec<GraphEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_node_id, target_node_id, relation_type, repository FROM edges WHERE repository = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![repository], map_edge)?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    pub fn count_nodes(&self, repository: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE repository = ?",
            params![repository],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_edges(&self, repository: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE repository = ?",
            params![repository],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Node counts grouped by the `type` property.
    pub fn nodes_by_type(&self, repository: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT COALESCE(json_extract(properties, '$.type'), 'unknown'), COUNT(*)
            FROM nodes WHERE repository = ?
            GROUP BY 1
            "#,
        )?;
        let rows = stmt.query_map(params![repository], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count);
        }
        Ok(counts)
    }

    /// Edge counts grouped by relation type.
    pub fn edges_by_type(&self, repository: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT relation_type, COUNT(*) FROM edges WHERE repository = ? GROUP BY relation_type",
        )?;
        let rows = stmt.query_map(params![repository], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (relation, count) = row?;
            counts.insert(relation, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::chunks::tests::chunk;
    use serde_json::json;

    fn node(name: &str, chunk_id: i64) -> NewNode {
        NewNode {
            label: name.to_string(),
            properties: json!({"type": "function", "name": name}),
            source_chunk_id: chunk_id,
        }
    }

    #[test]
    fn test_replace_graph_roundtrip() {
        let mut db = Db::open_in_memory(4).unwrap();
        db.replace_file_chunks(
            "repo",
            "a.ts",
            &[chunk("a", ChunkKind::Function), chunk("b", ChunkKind::Function)],
            &[vec![0.5; 4], vec![0.25; 4]],
            || true,
        )
        .unwrap();
        let chunk_ids: Vec<i64> = db
            .load_graph_chunks("repo", &[])
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();

        let nodes = vec![node("a", chunk_ids[0]), node("b", chunk_ids[1])];
        let edges = vec![
            NewEdge { source: 0, target: 1, relation: RelationType::Calls },
            // Duplicate collapses on the unique key
            NewEdge { source: 0, target: 1, relation: RelationType::Calls },
            NewEdge { source: 0, target: 1, relation: RelationType::Imports },
        ];

        let (ids, stored) = db.replace_graph("repo", &nodes, &edges).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(stored, 2);

        let listed = db.list_nodes("repo").unwrap();
        assert_eq!(listed[0].name(), Some("a"));
        assert_eq!(listed[0].node_type(), Some("function"));

        let embedded: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE embedding IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(embedded, 2);

        let by_type = db.edges_by_type("repo").unwrap();
        assert_eq!(by_type.get("calls"), Some(&1));
        assert_eq!(by_type.get("imports"), Some(&1));

        // Rebuilding replaces instead of appending
        db.replace_graph("repo", &nodes[..1], &[]).unwrap();
        assert_eq!(db.count_nodes("repo").unwrap(), 1);
        assert_eq!(db.count_edges("repo").unwrap(), 0);
    }

    #[test]
    fn test_write_node_properties_isolates_failures() {
        let mut db = Db::open_in_memory(4).unwrap();
        db.replace_file_chunks("repo", "a.ts", &[chunk("a", ChunkKind::Function)], &[vec![0.0; 4]], || true)
            .unwrap();
        let chunk_id = db.load_graph_chunks("repo", &[]).unwrap()[0].id;
        let (ids, _) = db
            .replace_graph("repo", &[node("a", chunk_id), node("b", chunk_id)], &[])
            .unwrap();

        let updates = vec![
            (ids[0], json!({"type": "function", "name": "a", "fan_in": 3}).to_string()),
            (ids[1], "{not json".to_string()),
        ];
        let failed = db.write_node_properties(&updates).unwrap();
        assert_eq!(failed, vec![ids[1]]);

        let nodes = db.list_nodes("repo").unwrap();
        assert_eq!(nodes[0].properties["fan_in"], 3);
        assert_eq!(nodes[1].name(), Some("b"));
    }
}
