//! Database schema definitions
//!
//! All SQL schema for the queue-server database lives here.

use rusqlite::Connection;

/// SQL schema for the queue-server database
pub const SCHEMA_SQL: &str = r#"
-- URLs that have ever been enqueued or indexed; dedup filter
CREATE TABLE IF NOT EXISTS seen_urls (
    url_hash INTEGER PRIMARY KEY
) WITHOUT ROWID;

-- Hosts whose robots.txt has been fetched (or scheduled)
CREATE TABLE IF NOT EXISTS robots_known (
    host_hash INTEGER PRIMARY KEY
) WITHOUT ROWID;

-- Etag / Expires revalidation cache, keyed by url hash
CREATE TABLE IF NOT EXISTS etag_cache (
    url_hash INTEGER PRIMARY KEY,
    etag TEXT,
    expires TEXT
) WITHOUT ROWID;

-- Small key/value store for crawl state (phase, crawl_time, config hash)
CREATE TABLE IF NOT EXISTS crawl_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
