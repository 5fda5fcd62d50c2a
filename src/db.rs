use crate::error::{HarvestError, Result};
use crate::storage::CatalogStore;
use crate::types::{is_enriched, MovieId, RawMovieData, StubRecord, FIELD_ATTEMPTS};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed catalog store.
///
/// One row per movie; the full document lives in a JSON column while the
/// enriched flag and attempt counter are mirrored into indexed columns so
/// `find_unenriched` stays cheap at export scale. Every write is a single
/// statement, so a failed run never leaves a half-written record.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS movies (
    id       INTEGER PRIMARY KEY,
    title    TEXT,
    enriched INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    doc      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_movies_enriched ON movies(enriched);
";

impl SqliteCatalog {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened catalog store at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn doc_columns(record: &RawMovieData) -> (Option<String>, bool, i64) {
        let title = record
            .get("original_title")
            .or_else(|| record.get("title"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let attempts = record
            .get(FIELD_ATTEMPTS)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        (title, is_enriched(record), attempts)
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn insert_if_absent(&self, id: MovieId, record: &RawMovieData) -> Result<bool> {
        let (title, enriched, attempts) = Self::doc_columns(record);
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO movies (id, title, enriched, attempts, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, title, enriched, attempts, record.to_string()],
        )?;
        Ok(inserted > 0)
    }

    async fn overwrite(&self, id: MovieId, record: &RawMovieData) -> Result<()> {
        let (title, enriched, attempts) = Self::doc_columns(record);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO movies (id, title, enriched, attempts, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 enriched = excluded.enriched,
                 attempts = excluded.attempts,
                 doc = excluded.doc",
            params![id, title, enriched, attempts, record.to_string()],
        )?;
        Ok(())
    }

    async fn find_unenriched(&self, limit: usize) -> Result<Vec<StubRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc FROM movies WHERE enriched = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let id: MovieId = row.get(0)?;
            let doc: String = row.get(1)?;
            Ok((id, doc))
        })?;

        let mut stubs = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            let doc: RawMovieData = serde_json::from_str(&doc)
                .map_err(|e| HarvestError::Store(format!("corrupt document for id {id}: {e}")))?;
            stubs.push(StubRecord { id, doc });
        }
        Ok(stubs)
    }

    async fn exists(&self, id: MovieId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT 1 FROM movies WHERE id = ?1")?;
        Ok(stmt.exists(params![id])?)
    }

    async fn count_unenriched(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM movies WHERE enriched = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{stamp_enriched, OUTCOME_DETAIL};
    use serde_json::json;

    #[tokio::test]
    async fn sqlite_insert_if_absent_never_clobbers() {
        let store = SqliteCatalog::open_in_memory().unwrap();

        let mut enriched = json!({"id": 1, "original_title": "A", "runtime": 120});
        stamp_enriched(&mut enriched, OUTCOME_DETAIL);
        store.overwrite(1, &enriched).await.unwrap();

        // A later bulk import of the same id must not touch the record
        let stub = json!({"id": 1, "original_title": "A"});
        assert!(!store.insert_if_absent(1, &stub).await.unwrap());

        let unenriched = store.find_unenriched(10).await.unwrap();
        assert!(unenriched.is_empty());
        assert_eq!(store.count_unenriched().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sqlite_find_unenriched_orders_by_id() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        for id in [5, 2, 9, 1] {
            store
                .insert_if_absent(id, &json!({"id": id}))
                .await
                .unwrap();
        }

        let batch = store.find_unenriched(3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 5]);
    }

    #[tokio::test]
    async fn sqlite_overwrite_replaces_whole_document() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        store
            .insert_if_absent(3, &json!({"id": 3, "original_title": "Old", "stray": true}))
            .await
            .unwrap();

        let mut detail = json!({"id": 3, "original_title": "New", "runtime": 95});
        stamp_enriched(&mut detail, OUTCOME_DETAIL);
        store.overwrite(3, &detail).await.unwrap();

        assert!(store.exists(3).await.unwrap());
        let remaining = store.find_unenriched(10).await.unwrap();
        assert!(remaining.is_empty());
    }
}
