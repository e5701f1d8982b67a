use super::{Db, serialize_vector};
use rusqlite::{Result, params};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub file_path: String,
    pub chunk_index: usize,
    pub kind: String,
    pub similarity: f64,
}

impl Db {
    /// Nearest chunks of a repository by cosine distance.
    ///
    /// Only chunks with a stored vector take part; anything persisted without
    /// one is invisible here.
    pub fn search_chunks(
        &self,
        repository: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.id,
                c.file_path,
                c.chunk_index,
                c.kind,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            WHERE c.repository = ?
            ORDER BY distance ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), repository, top_k as i64],
            |row| {
                let distance: f64 = row.get(4)?;
                Ok(ChunkHit {
                    chunk_id: row.get(0)?,
                    file_path: row.get(1)?,
                    chunk_index: row.get::<_, i64>(2)? as usize,
                    kind: row.get(3)?,
                    similarity: 1.0 - (distance / 2.0),
                })
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
