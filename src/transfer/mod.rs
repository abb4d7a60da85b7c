//! Transfer protocol shared by the queue-server and fetchers
//!
//! Payloads are bincode-serialized, length-prefixed, gzip-compressed, and
//! URL-safe base64 encoded, then split into parts that fit under the
//! receiver's advertised POST size ceiling. Every part carries a hash of
//! itself and of the whole payload; every request carries a session token
//! recomputed per attempt so long retry windows cannot be replayed.

mod chunk;
mod client;
mod codec;
mod session;
mod wire;

pub use chunk::{reassemble, split_payload, verify_part, PayloadPart, PART_OVERHEAD};
pub use client::UploadClient;
pub use codec::{decode_payload, encode_payload};
pub use session::{session_token, verify_session};
pub use wire::{
    ByteCounts, CrawlParameters, DiscoveredUrl, RevalidationUpload, RobotsUpload, UpdateResponse,
    UpdateStatus, UploadBundle,
};

use thiserror::Error;

/// Errors from transfer operations
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Payload corrupt: {0}")]
    Corrupt(String),

    #[error("Payload hash mismatch")]
    HashMismatch,

    #[error("Part {part} of {num_parts} out of range")]
    PartOutOfRange { part: usize, num_parts: usize },

    #[error("Upload rejected by server: {0}")]
    Rejected(String),

    #[error("Upload abandoned after {0} attempts")]
    RetriesExhausted(u32),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;
