use super::{Db, models::*};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Result, params};
use std::collections::BTreeMap;

impl Db {
    /// Appends one indexing error and returns its id.
    pub fn insert_error(&self, error: &NewIndexingError, occurred_at: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO indexing_errors (repository, file_path, error_type, message, traceback, chunk_kind, language, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                error.repository,
                error.file_path,
                error.error_type.as_str(),
                error.message,
                error.traceback,
                error.chunk_kind,
                error.language,
                occurred_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Returns one page of a repository's errors, newest first, plus the total count.
    pub fn list_errors(
        &self,
        repository: &str,
        error_type: Option<ErrorType>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<IndexingError>, usize)> {
        let mut filter = String::from(" WHERE repository = ?");
        let mut params: Vec<Value> = vec![Value::Text(repository.to_string())];
        if let Some(t) = error_type {
            filter.push_str(" AND error_type = ?");
            params.push(Value::Text(t.as_str().to_string()));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM indexing_errors{filter}"),
            param_refs.as_slice(),
            |row| row.get(0),
        )?;

        let query = format!(
            r#"
            SELECT id, repository, file_path, error_type, message, traceback, chunk_kind, language, occurred_at
            FROM indexing_errors{filter}
            ORDER BY occurred_at DESC, id DESC
            LIMIT {limit} OFFSET {offset}
            "#
        );

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let raw_type: String = row.get(3)?;
            let error_type = raw_type.parse::<ErrorType>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(IndexingError {
                id: row.get(0)?,
                repository: row.get(1)?,
                file_path: row.get(2)?,
                error_type,
                message: row.get(4)?,
                traceback: row.get(5)?,
                chunk_kind: row.get(6)?,
                language: row.get(7)?,
                occurred_at: row.get(8)?,
            })
        })?;

        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok((errors, total as usize))
    }

    /// Error counts of a repository grouped by type.
    pub fn error_counts(&self, repository: &str) -> Result<BTreeMap<ErrorType, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT error_type, COUNT(*) FROM indexing_errors WHERE repository = ? GROUP BY error_type",
        )?;
        let rows = stmt.query_map(params![repository], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (raw, count) = row?;
            if let Ok(t) = raw.parse::<ErrorType>() {
                counts.insert(t, count);
            }
        }
        Ok(counts)
    }
}
