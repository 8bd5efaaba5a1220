//! Persistent key/value store backing the asset registry
//!
//! The enrichment handler only needs a prefix-scoped scan/get/set
//! contract; the concrete store here is SQLite behind an r2d2 pool.

use crate::error::{EnrichdError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Prefix-scoped key/value contract consumed by the enrichment handler.
/// Values are opaque serialized records.
pub trait KvStore: Send + Sync {
    /// All (key, value) pairs under the prefix, in key order
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Insert or replace one value
    fn set(&self, prefix: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch one value, `None` when absent
    fn get(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed key/value store with migration support
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EnrichdError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| EnrichdError::Config(format!("Failed to create connection pool: {}", e)))?;

        // Enable WAL mode for better concurrency
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Number of rows under a prefix
    pub fn count(&self, prefix: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE prefix = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl KvStore for SqliteStore {
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE prefix = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn set(&self, prefix: &str, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (prefix, key, value, updated_at)
             VALUES (?1, ?2, ?3, strftime('%s', 'now'))",
            params![prefix, key, value],
        )?;
        Ok(())
    }

    fn get(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE prefix = ?1 AND key = ?2")?;
        let mut rows = stmt.query_map(params![prefix, key], |row| row.get::<_, Vec<u8>>(0))?;
        match rows.next() {
            Some(value) => Ok(Some(value?)),
            None => Ok(None),
        }
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: key/value table
    r#"
    CREATE TABLE kv (
        prefix TEXT NOT NULL,
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (prefix, key)
    );

    CREATE INDEX idx_kv_prefix ON kv(prefix);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_creation_and_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = SqliteStore::new(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_set_get_scan_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&temp_dir.path().join("test.db")).unwrap();

        store.set("assets", "10.0.0.1", b"alpha").unwrap();
        store.set("assets", "web01", b"beta").unwrap();

        assert_eq!(store.get("assets", "web01").unwrap().unwrap(), b"beta");
        assert!(store.get("assets", "nope").unwrap().is_none());

        let rows = store.scan("assets").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "10.0.0.1");
        assert_eq!(store.count("assets").unwrap(), 2);
    }

    #[test]
    fn test_scan_is_prefix_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&temp_dir.path().join("test.db")).unwrap();

        store.set("assets", "k", b"one").unwrap();
        store.set("segments", "k", b"two").unwrap();

        let rows = store.scan("assets").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, b"one");
    }

    #[test]
    fn test_set_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&temp_dir.path().join("test.db")).unwrap();

        store.set("assets", "k", b"old").unwrap();
        store.set("assets", "k", b"new").unwrap();

        assert_eq!(store.get("assets", "k").unwrap().unwrap(), b"new");
        assert_eq!(store.count("assets").unwrap(), 1);
    }
}
