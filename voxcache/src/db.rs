//! SQLite metadata database for the media cache.
//!
//! Tracks one row per cached media file: the resolver's stable key,
//! the source URL, the on-disk path, and access statistics used for
//! LRU eviction and TTL purging.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// One cached media file as recorded in the database.
#[derive(Debug, Serialize, Clone)]
pub struct CacheEntry {
    /// Stable key of the item (the resolver's `external_id`)
    pub pk: String,
    /// URL the media was resolved from
    pub source_url: String,
    /// Absolute path of the cached file
    pub path: String,
    /// Number of accesses
    pub hits: i32,
    /// Date/time of the last access (RFC3339)
    pub last_used: Option<String>,
}

impl CacheEntry {
    /// Parses `last_used` back into a timestamp, if present and valid.
    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// SQLite database for cache metadata.
///
/// The connection lives behind a mutex; all statements are short-lived, so
/// callers never observe the lock being held across I/O of their own.
#[derive(Debug)]
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Opens (or creates) the database at `path`.
    pub fn init(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS media (
                pk TEXT PRIMARY KEY,
                source_url TEXT,
                path TEXT,
                hits INTEGER DEFAULT 0,
                last_used TEXT
            )",
            [],
        )?;

        // Composite index backing the LRU ordering (get_oldest)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_media_lru ON media (last_used ASC, hits ASC)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Adds or refreshes an entry.
    pub fn add(&self, pk: &str, source_url: &str, path: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO media (pk, source_url, path, hits, last_used)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(pk) DO UPDATE SET
                 source_url = excluded.source_url,
                 path = excluded.path,
                 last_used = excluded.last_used",
            params![pk, source_url, path, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Fetches an entry by key.
    pub fn get(&self, pk: &str) -> rusqlite::Result<CacheEntry> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT pk, source_url, path, hits, last_used FROM media WHERE pk = ?1",
            [pk],
            row_to_entry,
        )
    }

    /// Bumps the hit counter and refreshes the last-used timestamp.
    pub fn update_hit(&self, pk: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE media SET hits = hits + 1, last_used = ?1 WHERE pk = ?2",
            params![Utc::now().to_rfc3339(), pk],
        )?;
        Ok(())
    }

    /// Removes an entry.
    pub fn delete(&self, pk: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM media WHERE pk = ?1", [pk])?;
        Ok(())
    }

    /// Number of entries currently recorded.
    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All entries, most used first.
    pub fn get_all(&self) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pk, source_url, path, hits, last_used FROM media ORDER BY hits DESC",
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// The `limit` least-recently-used entries, oldest first.
    pub fn get_oldest(&self, limit: usize) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pk, source_url, path, hits, last_used
             FROM media
             ORDER BY last_used ASC, hits ASC
             LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Entries whose last use predates `cutoff`, oldest first.
    pub fn older_than(&self, cutoff: DateTime<Utc>) -> rusqlite::Result<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pk, source_url, path, hits, last_used
             FROM media
             WHERE last_used < ?1
             ORDER BY last_used ASC",
        )?;
        let entries = stmt
            .query_map([cutoff.to_rfc3339()], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        pk: row.get(0)?,
        source_url: row.get(1)?,
        path: row.get(2)?,
        hits: row.get(3)?,
        last_used: row.get(4)?,
    })
}
