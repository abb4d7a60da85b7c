//! Server-side crawl scheduling
//!
//! The scheduler owns the frontier and decides which URLs go into each
//! fetch batch, honoring robots state, crawl-delays, and hourly quotas.
//! Its durable state lives under `schedules/` in the work directory:
//! pending batch files, the crawl status file, and the admin message file
//! operators drop commands into.

mod batch;
mod messages;
mod scheduler;

pub use batch::{claim_batch, write_batch, BatchMeta, FetchBatch, UrlSlot};
pub use messages::{
    consume_admin_message, write_admin_message, AdminMessage, AdminStatus, MESSAGE_FILE,
};
pub use scheduler::Scheduler;

use serde::{Deserialize, Serialize};

/// Lifecycle of one crawl on the queue-server
///
/// `WaitingStart -> Continue -> Stop`; a resume re-enters `Continue` from
/// the saved crawl status and schedule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlPhase {
    /// No crawl configured yet; `a=crawlTime` reports timestamp 0
    WaitingStart,
    /// Crawl running; batches are produced and uploads accepted
    Continue,
    /// Crawl stopped; fetchers are told to stop on their next poll
    Stop,
}

/// Which halves of the queue-server this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerRole {
    /// Scheduler and indexer in one process
    Both,
    /// Batch production only; a peer process indexes
    Scheduler,
    /// Index merging only; a peer process schedules
    Indexer,
}

impl ServerRole {
    pub fn schedules(self) -> bool {
        matches!(self, ServerRole::Both | ServerRole::Scheduler)
    }

    pub fn indexes(self) -> bool {
        matches!(self, ServerRole::Both | ServerRole::Indexer)
    }
}
