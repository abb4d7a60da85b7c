//! Stable document keys
//!
//! Every page and link gets a key combining the URL hash, the content
//! hash, and a discriminator, so documents and in-links coexist in one
//! keyspace without collision. Links reuse the *referencing* URL's hash
//! (their postings describe the link source) plus the target hash and an
//! internal/external flag.

use crate::storage::url_hash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Discriminator for the shared doc/link keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocKind {
    /// A downloaded page
    Document,
    /// A link whose target stays on the referrer's company-level domain
    InternalLink,
    /// A link crossing to another company-level domain
    ExternalLink,
}

/// Stable per-document hash key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey {
    pub url_hash: u64,
    pub content_hash: u64,
    pub kind: DocKind,
}

impl DocKey {
    /// Key for a downloaded page
    pub fn for_document(url: &str, content: &[u8]) -> Self {
        Self {
            url_hash: url_hash(url),
            content_hash: content_hash(content),
            kind: DocKind::Document,
        }
    }

    /// Key for a discovered link
    ///
    /// `referrer` is the page the link appeared on; the target hash fills
    /// the content-hash slot so two links from one page stay distinct.
    pub fn for_link(referrer: &str, target: &str, internal: bool) -> Self {
        Self {
            url_hash: url_hash(referrer),
            content_hash: url_hash(target),
            kind: if internal {
                DocKind::InternalLink
            } else {
                DocKind::ExternalLink
            },
        }
    }

}

/// 64-bit content hash: first eight bytes of SHA-256 over the body
pub fn content_hash(content: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
