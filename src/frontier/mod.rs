//! URL frontier: the priority queue of not-yet-fetched URLs
//!
//! The frontier is the leaf data structure of the queue-server. It holds
//! (url, weight, flags) triples ordered by weight, backed by schedule
//! files on disk so a crash loses at most the in-RAM tail. A URL is never
//! present in-queue more than once; cross-run dedup is the job of the
//! persistent seen-url filter in [`crate::storage`].

mod persist;
mod queue;

pub use persist::{
    decode_url_record, dump_schedule, encode_url_record, load_schedule_dir, ScheduleMeta,
};
pub use queue::UrlFrontier;

use thiserror::Error;

/// Errors from frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    /// A slot failed its sanity checks; callers treat this as transient
    /// and discard the slot
    #[error("Corrupted frontier slot at index {0}")]
    CorruptSlot(usize),

    #[error("URL not present in frontier")]
    NotFound,

    #[error("Malformed URL record: {0}")]
    MalformedRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheduling flag attached to a frontier entry
///
/// Lets the scheduler record robots state on an entry without removing it,
/// so a later scan can skip re-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlFlag {
    /// No scheduling decision recorded yet
    None,
    /// This entry is a robots.txt URL
    Robot,
    /// Robots checked; admissible now
    Schedulable,
    /// Robots checked; admissible after this many seconds of crawl-delay
    SchedulableDelayed(u32),
}

/// One queued URL with its scheduling metadata
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: String,
    pub weight: f64,
    pub crawl_delay: u32,
    pub flag: UrlFlag,
    /// Insertion sequence; breaks weight ties FIFO
    pub(crate) seq: u64,
}

impl FrontierEntry {
    /// Sanity check used by `peek`; entries failing it are reported as
    /// corrupt slots and discarded by the caller
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.url.is_empty() && self.weight.is_finite()
    }
}
