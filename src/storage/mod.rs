//! Persistent server-side state
//!
//! This module owns the SQLite database behind the queue-server: the
//! seen-url and robots-known hash filters, the etag/expires revalidation
//! cache, and a small key-value table for crawl state (phase, crawl_time,
//! config hash). Fetchers never touch this database; they only see the
//! network protocol.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing crawl state key: {0}")]
    MissingState(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stable 64-bit hash of a URL (or host), used as the key in the
/// persistent filters and in doc keys
///
/// First eight bytes of SHA-256, big-endian. Stored as i64 in SQLite
/// (same bits, reinterpreted), compared as bits everywhere.
pub fn url_hash(url: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Cached HTTP revalidation data for one URL
#[derive(Debug, Clone, PartialEq)]
pub struct EtagRecord {
    pub url_hash: u64,
    pub etag: Option<String>,
    /// Expiry timestamp (RFC 3339 or HTTP date); the URL is skipped
    /// during batch production until then
    pub expires: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_stable() {
        let a = url_hash("https://example.com/page");
        let b = url_hash("https://example.com/page");
        assert_eq!(a, b);
    }

    #[test]
    fn test_url_hash_differs() {
        assert_ne!(
            url_hash("https://example.com/a"),
            url_hash("https://example.com/b")
        );
    }
}
