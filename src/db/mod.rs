//! Chunk, graph and error store using SQLite and sqlite-vec
use rusqlite::{Connection, Result};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

pub mod chunks;
pub mod errors;
pub mod graph;
pub mod models;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    file_path TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    kind TEXT NOT NULL,
    language TEXT NOT NULL,
    source_text TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(repository, file_path, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_repo_file ON chunks(repository, file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_language ON chunks(language);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    label TEXT NOT NULL,
    properties TEXT NOT NULL,
    source_chunk_id INTEGER,
    embedding BLOB,
    FOREIGN KEY (source_chunk_id) REFERENCES chunks(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_repo ON nodes(repository);
CREATE INDEX IF NOT EXISTS idx_nodes_chunk ON nodes(source_chunk_id);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_node_id INTEGER NOT NULL,
    target_node_id INTEGER NOT NULL,
    relation_type TEXT NOT NULL CHECK (relation_type IN ('calls', 'imports', 're_exports')),
    repository TEXT NOT NULL,
    UNIQUE(source_node_id, target_node_id, relation_type),
    FOREIGN KEY (source_node_id) REFERENCES nodes(id) ON DELETE CASCADE,
    FOREIGN KEY (target_node_id) REFERENCES nodes(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_edges_repo ON edges(repository);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_node_id);

CREATE TABLE IF NOT EXISTS indexing_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    file_path TEXT NOT NULL,
    error_type TEXT NOT NULL CHECK (error_type IN (
        'encoding_error', 'parsing_error', 'chunking_error',
        'embedding_error', 'persistence_error', 'unexpected'
    )),
    message TEXT NOT NULL,
    traceback TEXT,
    chunk_kind TEXT,
    language TEXT,
    occurred_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_errors_repo ON indexing_errors(repository, occurred_at);
CREATE INDEX IF NOT EXISTS idx_errors_type ON indexing_errors(error_type);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A SQLite connection initialized with sqlite-vec and the application schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    ///
    /// `dimensions` fixes the width of the chunk vector table.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening database connection: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(path)?;

        // WAL lets workers write different files while others read
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::init(conn, dimensions)
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        Ok(Self { conn })
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

// ── Connection pooling ───────────────────────────────────────────────

/// r2d2 manager handing out schema-initialized `Db` connections.
#[derive(Debug, Clone)]
pub struct DbManager {
    path: PathBuf,
    dimensions: usize,
}

impl DbManager {
    pub fn new<P: Into<PathBuf>>(path: P, dimensions: usize) -> Self {
        Self {
            path: path.into(),
            dimensions,
        }
    }
}

impl r2d2::ManageConnection for DbManager {
    type Connection = Db;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Db> {
        Db::open(&self.path, self.dimensions)
    }

    fn is_valid(&self, db: &mut Db) -> Result<()> {
        db.conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _db: &mut Db) -> bool {
        false
    }
}

pub type DbPool = r2d2::Pool<DbManager>;

/// Build a small connection pool over a file-backed database.
///
/// Workers use `max_size = 2`: one connection for the file being written and
/// one for error logging.
pub fn open_pool<P: Into<PathBuf>>(
    path: P,
    dimensions: usize,
    max_size: u32,
) -> std::result::Result<DbPool, r2d2::Error> {
    let manager = DbManager::new(path, dimensions);
    let pool = r2d2::Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;
    info!("Database pool ready (max {} connections)", max_size.max(1));
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory(8).expect("Failed to open in-memory DB");

        let tables: usize = db.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('chunks', 'vec_chunks', 'nodes', 'edges', 'indexing_errors');",
            [],
            |row| row.get(0),
        ).unwrap();

        assert_eq!(tables, 5);
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_error_type_check_constraint() {
        let db = Db::open_in_memory(4).unwrap();
        let res = db.conn.execute(
            "INSERT INTO indexing_errors (repository, file_path, error_type, message, occurred_at) VALUES ('r', 'f', 'bogus', 'm', CURRENT_TIMESTAMP)",
            [],
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_pool_shares_file_database() {
        let dir = tempdir().unwrap();
        let pool = open_pool(dir.path().join("graph.db"), 4, 2).unwrap();

        {
            let a = pool.get().unwrap();
            a.conn
                .execute(
                    "INSERT INTO nodes (repository, label, properties) VALUES ('r', 'x', '{}')",
                    [],
                )
                .unwrap();
        }

        let b = pool.get().unwrap();
        let count: i64 = b
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
