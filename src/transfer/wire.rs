//! Wire structures exchanged between fetchers and the queue-server
//!
//! These are the versioned record schemas behind the §6 endpoints; the
//! encoding itself (gzip + bincode + base64url) lives in [`super::codec`].

use crate::index::{MiniIndexShard, PageSummary};
use serde::{Deserialize, Serialize};

/// A URL discovered by a fetcher, offered back for enqueueing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    pub weight: f32,
}

/// A robots.txt download result reported by a fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsUpload {
    pub host: String,
    pub status: u16,
    pub body: String,
    pub ip_addresses: Vec<String>,
}

/// Revalidation headers captured from a page download
///
/// The queue-server stores these in its etag cache; unexpired URLs are
/// skipped during batch production instead of being re-fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalidationUpload {
    pub url: String,
    pub etag: Option<String>,
    pub expires: Option<String>,
}

/// Byte accounting for one upload, echoed in the POST form
///
/// `total == 0` means the fetcher has nothing to say; the coordinator
/// logs and skips the network call entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ByteCounts {
    pub total: u64,
    pub to_crawl: u64,
    pub seen: u64,
    pub index: u64,
}

/// Everything one fetcher uploads after a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBundle {
    /// Crawl timestamp this work belongs to
    pub crawl_time: u64,
    /// Fetcher identity, for logging and batch accounting
    pub machine_id: String,
    /// Newly discovered URLs to enqueue (after seen-filtering)
    pub to_crawl: Vec<DiscoveredUrl>,
    /// Hashes of URLs this fetcher downloaded, to mark seen
    pub seen_urls: Vec<u64>,
    /// Robots.txt downloads completed this batch
    pub robots: Vec<RobotsUpload>,
    /// Etag/Expires headers seen on downloaded pages
    pub revalidations: Vec<RevalidationUpload>,
    /// Page summaries, in shard posting order
    pub summaries: Vec<PageSummary>,
    /// The mini inverted index shard for this batch
    pub shard: MiniIndexShard,
}

impl UploadBundle {
    /// Returns true when there is nothing worth uploading
    pub fn is_empty(&self) -> bool {
        self.to_crawl.is_empty()
            && self.seen_urls.is_empty()
            && self.robots.is_empty()
            && self.revalidations.is_empty()
            && self.summaries.is_empty()
            && self.shard.is_empty()
    }
}

/// Server verdict on one uploaded part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateStatus {
    /// Part accepted; send the next one
    Continue,
    /// Part rejected; resend the same part
    Redo,
    /// Crawl stopped; abandon the upload
    Stop,
}

/// Response body for `a=update` requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub status: UpdateStatus,
    /// The server's real POST ceiling; senders that assumed a larger one
    /// shrink their chunk size and restart the upload once
    pub post_max_size: usize,
}

/// Crawl parameters served by `a=crawlTime`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlParameters {
    /// Active crawl timestamp; 0 means no crawl is running
    pub crawl_time: u64,
    pub crawl_order: String,
    pub queue_servers: Vec<String>,
    pub allowed_sites: Vec<String>,
    pub disallowed_sites: Vec<String>,
}
