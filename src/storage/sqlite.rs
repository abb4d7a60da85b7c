//! SQLite store implementation
//!
//! One connection per server process; the queue-server roles are
//! single-threaded event loops, so no pooling is needed.

use crate::storage::schema::initialize_schema;
use crate::storage::{EtagRecord, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed persistent state for the queue-server
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at the given path
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Seen-url filter =====

    /// Returns true if the url hash is in the seen filter
    pub fn is_seen(&self, url_hash: u64) -> StorageResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM seen_urls WHERE url_hash = ?1")?;
        Ok(stmt.exists(params![url_hash as i64])?)
    }

    /// Marks a batch of url hashes as seen; already-present hashes are ignored
    pub fn mark_seen(&mut self, hashes: &[u64]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO seen_urls (url_hash) VALUES (?1)")?;
            for h in hashes {
                stmt.execute(params![*h as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Set difference: returns the subset of `hashes` not yet seen
    ///
    /// Used by to-crawl archive ingest so already-seen URLs are dropped
    /// before insertion rather than after.
    pub fn filter_unseen(&self, hashes: &[u64]) -> StorageResult<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM seen_urls WHERE url_hash = ?1")?;
        let mut unseen = Vec::new();
        for h in hashes {
            if !stmt.exists(params![*h as i64])? {
                unseen.push(*h);
            }
        }
        Ok(unseen)
    }

    /// Number of entries in the seen filter
    pub fn seen_count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen_urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Robots-known filter =====

    /// Returns true if robots.txt for this host hash is known or pending
    pub fn is_robots_known(&self, host_hash: u64) -> StorageResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM robots_known WHERE host_hash = ?1")?;
        Ok(stmt.exists(params![host_hash as i64])?)
    }

    /// Marks a host's robots.txt as known/pending
    pub fn mark_robots_known(&mut self, host_hash: u64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO robots_known (host_hash) VALUES (?1)",
            params![host_hash as i64],
        )?;
        Ok(())
    }

    /// Drops a host from the robots-known filter (TTL expiry forces re-fetch)
    pub fn forget_robots(&mut self, host_hash: u64) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM robots_known WHERE host_hash = ?1",
            params![host_hash as i64],
        )?;
        Ok(())
    }

    // ===== Etag / Expires cache =====

    /// Stores revalidation data for a URL
    pub fn put_etag(&mut self, record: &EtagRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO etag_cache (url_hash, etag, expires) VALUES (?1, ?2, ?3)",
            params![record.url_hash as i64, record.etag, record.expires],
        )?;
        Ok(())
    }

    /// Looks up revalidation data for a URL
    pub fn get_etag(&self, url_hash: u64) -> StorageResult<Option<EtagRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT etag, expires FROM etag_cache WHERE url_hash = ?1")?;
        let record = stmt
            .query_row(params![url_hash as i64], |row| {
                Ok(EtagRecord {
                    url_hash,
                    etag: row.get(0)?,
                    expires: row.get(1)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    /// Returns true if the cached copy of this URL has not yet expired
    ///
    /// Consulted during batch production: unexpired URLs are skipped
    /// rather than re-fetched.
    pub fn is_unexpired(&self, url_hash: u64, now: DateTime<Utc>) -> StorageResult<bool> {
        match self.get_etag(url_hash)? {
            Some(record) => match record.expires.as_deref() {
                Some(expires) => match parse_expires(expires) {
                    Some(t) => Ok(now < t),
                    // Unparseable expiry: treat as expired, re-fetch
                    None => Ok(false),
                },
                None => Ok(false),
            },
            None => Ok(false),
        }
    }

    // ===== Crawl state =====

    /// Stores a crawl-state key
    pub fn set_state(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Reads a crawl-state key
    pub fn get_state(&self, key: &str) -> StorageResult<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM crawl_state WHERE key = ?1")?;
        Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
    }

    /// Reads a crawl-state key, failing if absent
    pub fn require_state(&self, key: &str) -> StorageResult<String> {
        self.get_state(key)?
            .ok_or_else(|| StorageError::MissingState(key.to_string()))
    }
}

/// Parses an expiry timestamp in either RFC 3339 or the RFC 1123 form
/// HTTP Expires headers arrive in
fn parse_expires(expires: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(expires)
        .or_else(|_| DateTime::parse_from_rfc2822(expires))
        .ok()
}
