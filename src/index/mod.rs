//! Inverted-index structures and the server-side merge pipeline
//!
//! Fetchers build a [`MiniIndexShard`] per batch: an in-memory map from
//! term to postings, where each posting points at a page summary by a
//! placeholder offset. The server appends the summaries to the active
//! generation's summary store (which returns real byte offsets), rewrites
//! the shard's postings, and folds the shard in as a new dictionary tier.
//! Tiers are merged periodically to bound lookup fan-out; generations roll
//! over every `docs-per-generation` documents.

mod generation;
mod keys;
mod merger;
mod shard;
mod store;

pub use generation::{Generation, GenerationManager};
pub use keys::{content_hash, DocKey, DocKind};
pub use merger::IndexMerger;
pub use shard::{build_shard, MiniIndexShard, Posting, NEEDS_OFFSET_FLAG};
pub use store::{PageSummary, SummaryStore};

use thiserror::Error;

/// Errors from index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt tier file {path}: {reason}")]
    CorruptTier { path: String, reason: String },

    #[error("Corrupt summary record at offset {0}")]
    CorruptSummary(u64),

    #[error("Corrupt index archive: {0}")]
    CorruptArchive(String),

    #[error("Generation {0} is closed")]
    GenerationClosed(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
