use super::{Db, models::*, serialize_vector};
use rusqlite::types::Value;
use rusqlite::{Result, TransactionBehavior, params};

/// What happened to a file's chunk set inside `replace_file_chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Committed(usize),
    /// The caller withdrew before commit; the transaction rolled back.
    Abandoned,
}

impl Db {
    /// Replaces every chunk of one file with `chunks` and their vectors.
    ///
    /// Old rows and vectors are removed inside the same transaction, so a
    /// re-index never leaves duplicates. `still_wanted` is consulted right
    /// before commit; returning `false` rolls everything back.
    pub fn replace_file_chunks<F>(
        &mut self,
        repository: &str,
        file_path: &str,
        chunks: &[SourceChunk],
        embeddings: &[Vec<f32>],
        still_wanted: F,
    ) -> Result<ReplaceOutcome>
    where
        F: FnOnce() -> bool,
    {
        assert_eq!(
            chunks.len(),
            embeddings.len(),
            "chunks and embeddings length mismatch"
        );

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE repository = ? AND file_path = ?)",
            params![repository, file_path],
        )?;
        tx.execute(
            "DELETE FROM chunks WHERE repository = ? AND file_path = ?",
            params![repository, file_path],
        )?;

        for (index, chunk) in chunks.iter().enumerate() {
            let metadata = serde_json::to_string(&chunk.metadata)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                r#"
                INSERT INTO chunks (repository, file_path, chunk_index, kind, language, source_text, start_line, end_line, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    repository,
                    file_path,
                    index as i64,
                    chunk.kind.as_str(),
                    chunk.language,
                    chunk.source_text,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    metadata,
                ],
            )?;
            let chunk_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, serialize_vector(&embeddings[index])],
            )?;
        }

        if !still_wanted() {
            // Dropping the transaction rolls it back
            return Ok(ReplaceOutcome::Abandoned);
        }

        tx.commit()?;
        Ok(ReplaceOutcome::Committed(chunks.len()))
    }

    /// Removes one file's chunks and vectors. Returns the number of chunk rows deleted.
    pub fn delete_file_chunks(&mut self, repository: &str, file_path: &str) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE repository = ? AND file_path = ?)",
            params![repository, file_path],
        )?;
        let rows = tx.execute(
            "DELETE FROM chunks WHERE repository = ? AND file_path = ?",
            params![repository, file_path],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Counts chunks of a repository, optionally restricted to one file.
    pub fn count_chunks(&self, repository: &str, file_path: Option<&str>) -> Result<usize> {
        let count: i64 = match file_path {
            Some(path) => self.conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE repository = ? AND file_path = ?",
                params![repository, path],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE repository = ?",
                params![repository],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    /// Counts chunks of a repository that carry a vector.
    pub fn count_embedded_chunks(&self, repository: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks c JOIN vec_chunks v ON v.rowid = c.id WHERE c.repository = ?",
            params![repository],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Reads every chunk of a repository in stable `(file_path, chunk_index)` order.
    ///
    /// An empty `languages` slice selects all languages.
    pub fn load_graph_chunks(
        &self,
        repository: &str,
        languages: &[String],
    ) -> Result<Vec<StoredChunk>> {
        let mut query = String::from(
            r#"
            SELECT id, repository, file_path, chunk_index, kind, language, start_line, end_line, metadata
            FROM chunks
            WHERE repository = ?
            "#,
        );
        let mut params: Vec<Value> = vec![Value::Text(repository.to_string())];

        if !languages.is_empty() {
            let placeholders = vec!["?"; languages.len()].join(", ");
            query.push_str(&format!(" AND language IN ({placeholders})"));
            params.extend(languages.iter().map(|l| Value::Text(l.clone())));
        }
        query.push_str(" ORDER BY file_path ASC, chunk_index ASC");

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(StoredChunk {
                id: row.get(0)?,
                repository: row.get(1)?,
                file_path: row.get(2)?,
                chunk_index: row.get::<_, i64>(3)? as usize,
                kind: row.get(4)?,
                language: row.get(5)?,
                start_line: row.get::<_, i64>(6)? as usize,
                end_line: row.get::<_, i64>(7)? as usize,
                metadata: row.get(8)?,
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Deletes every persisted artifact of a repository.
    ///
    /// Runs in one transaction in dependency order: edges, nodes, chunk
    /// vectors, chunks, then recorded indexing errors.
    pub fn clean_repository(&mut self, repository: &str) -> Result<CleanupStats> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let edges = tx.execute("DELETE FROM edges WHERE repository = ?", params![repository])?;
        let nodes = tx.execute("DELETE FROM nodes WHERE repository = ?", params![repository])?;
        let vectors = tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE repository = ?)",
            params![repository],
        )?;
        let chunks = tx.execute("DELETE FROM chunks WHERE repository = ?", params![repository])?;
        let errors = tx.execute(
            "DELETE FROM indexing_errors WHERE repository = ?",
            params![repository],
        )?;

        tx.commit()?;
        Ok(CleanupStats {
            edges,
            nodes,
            vectors,
            chunks,
            errors,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunk(name: &str, kind: ChunkKind) -> SourceChunk {
        SourceChunk {
            kind,
            language: "typescript".to_string(),
            source_text: format!("function {name}() {{}}"),
            start_line: 1,
            end_line: 1,
            metadata: ChunkMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_replace_file_chunks_replaces() {
        let mut db = Db::open_in_memory(4).unwrap();
        let chunks = vec![chunk("a", ChunkKind::Function), chunk("b", ChunkKind::Function)];
        let vectors = vec![vec![0.1; 4], vec![0.2; 4]];

        let outcome = db
            .replace_file_chunks("repo", "src/a.ts", &chunks, &vectors, || true)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Committed(2));
        assert_eq!(db.count_chunks("repo", Some("src/a.ts")).unwrap(), 2);

        // Same file again, smaller set: no stale rows survive
        let outcome = db
            .replace_file_chunks("repo", "src/a.ts", &chunks[..1], &vectors[..1], || true)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Committed(1));
        assert_eq!(db.count_chunks("repo", Some("src/a.ts")).unwrap(), 1);
        assert_eq!(db.count_embedded_chunks("repo").unwrap(), 1);
    }

    #[test]
    fn test_replace_file_chunks_abandoned_rolls_back() {
        let mut db = Db::open_in_memory(4).unwrap();
        let chunks = vec![chunk("a", ChunkKind::Function)];
        let vectors = vec![vec![0.1; 4]];

        let outcome = db
            .replace_file_chunks("repo", "a.ts", &chunks, &vectors, || false)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Abandoned);
        assert_eq!(db.count_chunks("repo", None).unwrap(), 0);
        assert_eq!(db.count_embedded_chunks("repo").unwrap(), 0);
    }

    #[test]
    fn test_load_graph_chunks_order_and_language_filter() {
        let mut db = Db::open_in_memory(4).unwrap();
        let mut py = chunk("p", ChunkKind::Function);
        py.language = "python".to_string();

        db.replace_file_chunks("repo", "z.ts", &[chunk("z", ChunkKind::Function)], &[vec![0.0; 4]], || true)
            .unwrap();
        db.replace_file_chunks("repo", "a.py", &[py], &[vec![0.0; 4]], || true)
            .unwrap();
        db.replace_file_chunks("other", "b.ts", &[chunk("b", ChunkKind::Function)], &[vec![0.0; 4]], || true)
            .unwrap();

        let all = db.load_graph_chunks("repo", &[]).unwrap();
        let files: Vec<&str> = all.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(files, vec!["a.py", "z.ts"]);

        let ts_only = db
            .load_graph_chunks("repo", &["typescript".to_string()])
            .unwrap();
        assert_eq!(ts_only.len(), 1);
        assert_eq!(ts_only[0].file_path, "z.ts");
        assert_eq!(ts_only[0].kind, "function");
    }

    #[test]
    fn test_clean_repository_scoped() {
        let mut db = Db::open_in_memory(4).unwrap();
        db.replace_file_chunks("repo", "a.ts", &[chunk("a", ChunkKind::Function)], &[vec![0.0; 4]], || true)
            .unwrap();
        db.replace_file_chunks("keep", "a.ts", &[chunk("a", ChunkKind::Function)], &[vec![0.0; 4]], || true)
            .unwrap();

        let stats = db.clean_repository("repo").unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 1);
        assert_eq!(db.count_chunks("repo", None).unwrap(), 0);
        assert_eq!(db.count_chunks("keep", None).unwrap(), 1);
    }
}
