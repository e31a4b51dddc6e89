//! SQLite history store
//!
//! Single `history` table keyed by URL. Uses r2d2 connection pooling so the
//! cache rebuild and the exact-match pass can read while the write aggregator
//! flushes.

use crate::interface::{HistoryProvider, HistorySink, OmniResult};
use crate::models::{HistoryRecord, VisitEvent};
use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

const RECORD_COLUMNS: &str = "id, url, title, visit_count, last_visited, created_at";

// Upsert by URL. An empty title never overwrites a stored one.
const UPSERT_SQL: &str = r#"
    INSERT INTO history (url, title, visit_count, last_visited, created_at)
    VALUES (?1, NULLIF(?2, ''), 1, ?3, ?3)
    ON CONFLICT(url) DO UPDATE SET
        visit_count = visit_count + 1,
        last_visited = excluded.last_visited,
        title = COALESCE(excluded.title, history.title)
"#;

/// Thread-safe history database using connection pooling
///
/// WAL mode lets readers proceed while a batch flush is in progress.
pub struct HistoryDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl HistoryDatabase {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA mmap_size=67108864;
                    PRAGMA cache_size=-32000;
                ")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (tests, benchmarks)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                visit_count INTEGER NOT NULL DEFAULT 0,
                last_visited INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_last_visited ON history(last_visited DESC);
            CREATE INDEX IF NOT EXISTS idx_history_url ON history(url);
        "#)?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
        Ok(HistoryRecord {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            visit_count: row.get(3)?,
            last_visited: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Get the database size in bytes
    pub fn database_size(&self) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    pub fn count_records(&self) -> DatabaseResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All records, most recently visited first. Never-visited rows sort last.
    pub fn fetch_all(&self) -> DatabaseResult<Vec<HistoryRecord>> {
        self.fetch_recent(None)
    }

    pub fn fetch_recent(&self, limit: Option<usize>) -> DatabaseResult<Vec<HistoryRecord>> {
        let conn = self.get_conn()?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {} FROM history ORDER BY last_visited IS NULL, last_visited DESC, id LIMIT ?1",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([limit], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Case-insensitive substring match on URL or title.
    pub fn search_substring(&self, pattern: &str, limit: usize) -> DatabaseResult<Vec<HistoryRecord>> {
        let pattern = pattern.trim();
        if pattern.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let escaped = pattern
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let like_pattern = format!("%{}%", escaped);
        let sql = format!(
            r#"SELECT {} FROM history
               WHERE url LIKE ?1 ESCAPE '\' COLLATE NOCASE
                  OR title LIKE ?1 ESCAPE '\' COLLATE NOCASE
               ORDER BY visit_count DESC, last_visited DESC
               LIMIT ?2"#,
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![like_pattern, limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn find_by_url(&self, url: &str) -> DatabaseResult<Option<HistoryRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM history WHERE url = ?1", RECORD_COLUMNS);
        Ok(conn.query_row(&sql, [url], Self::row_to_record).optional()?)
    }

    /// Record one visit: insert the URL or bump its count and visit time.
    pub fn record_visit(&self, url: &str, title: &str) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute(UPSERT_SQL, params![url, title, Utc::now().timestamp()])?;
        Ok(())
    }

    /// Record many visits in one transaction, in order.
    pub fn record_visits(&self, events: &[VisitEvent]) -> DatabaseResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().timestamp();
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for event in events {
                stmt.execute(params![event.url, event.title, now])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Insert or replace a fully specified record. Used for imports and
    /// fixtures where visit counts and times come from elsewhere.
    pub fn insert_record(&self, record: &HistoryRecord) -> DatabaseResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO history (url, title, visit_count, last_visited, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(url) DO UPDATE SET
                   title = excluded.title,
                   visit_count = excluded.visit_count,
                   last_visited = excluded.last_visited"#,
            params![
                record.url,
                record.title,
                record.visit_count,
                record.last_visited,
                record.created_at,
            ],
        )?;
        let id = conn.query_row("SELECT id FROM history WHERE url = ?1", [&record.url], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn delete_url(&self, url: &str) -> DatabaseResult<bool> {
        let conn = self.get_conn()?;
        Ok(conn.execute("DELETE FROM history WHERE url = ?1", [url])? > 0)
    }

    pub fn clear_all(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM history", [])?;
        Ok(())
    }
}

impl HistoryProvider for HistoryDatabase {
    fn get_all(&self) -> OmniResult<Vec<HistoryRecord>> {
        Ok(self.fetch_all()?)
    }

    fn get_recent(&self, limit: usize) -> OmniResult<Vec<HistoryRecord>> {
        Ok(self.fetch_recent(Some(limit))?)
    }

    fn search_exact(&self, pattern: &str, limit: usize) -> OmniResult<Vec<HistoryRecord>> {
        Ok(self.search_substring(pattern, limit)?)
    }

    fn get_by_url(&self, url: &str) -> OmniResult<Option<HistoryRecord>> {
        Ok(self.find_by_url(url)?)
    }

    fn count(&self) -> OmniResult<usize> {
        Ok(self.count_records()?)
    }
}

impl HistorySink for HistoryDatabase {
    fn add_or_update(&self, url: &str, title: &str) -> OmniResult<()> {
        Ok(self.record_visit(url, title)?)
    }

    fn add_or_update_batch(&self, events: &[VisitEvent]) -> OmniResult<usize> {
        Ok(self.record_visits(events)?)
    }
}
