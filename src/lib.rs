//! Netweft: a distributed crawl scheduler and indexer
//!
//! A central queue-server coordinates many fetcher processes: it hands out
//! weight-ordered fetch batches from a disk-backed URL frontier, enforces
//! robots.txt / crawl-delay / hourly quotas, and merges the mini inverted
//! index shards the fetchers upload into a durable, generation-partitioned
//! index.

pub mod config;
pub mod fetch;
pub mod frontier;
pub mod index;
pub mod robots;
pub mod schedule;
pub mod server;
pub mod storage;
pub mod transfer;

use thiserror::Error;

/// Main error type for netweft operations
#[derive(Debug, Error)]
pub enum NetweftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] transfer::TransferError),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("Crawl is not active (crawl_time = 0)")]
    NoActiveCrawl,

    #[error("Session rejected by queue server")]
    SessionRejected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid site pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for netweft operations
pub type Result<T> = std::result::Result<T, NetweftError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use frontier::{FrontierEntry, UrlFlag, UrlFrontier};
pub use index::{DocKey, MiniIndexShard};
pub use schedule::{CrawlPhase, Scheduler};
