//! In-memory frontier queue
//!
//! A sorted array-backed queue rather than a raw binary heap: batch
//! production scans the queue positionally from the highest-weight end,
//! so `peek(i)` must walk entries in non-increasing weight order. Inserts
//! binary-search for their slot; equal weights keep insertion (FIFO)
//! order via a monotonically increasing sequence number.

use crate::config::CrawlOrder;
use crate::frontier::{FrontierEntry, FrontierError, UrlFlag};
use crate::storage::url_hash;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Weight floor; when the minimum queued weight drops below this, all
/// weights are rescaled to avoid float underflow over long crawls
const MIN_WEIGHT_FLOOR: f64 = 1.0e-7;

/// Rescale target for the minimum weight
const RESCALE_TARGET: f64 = 1.0;

/// The URL frontier priority queue
pub struct UrlFrontier {
    /// Entries in dequeue order: weight descending for page-importance,
    /// sequence ascending (FIFO) for breadth-first
    entries: Vec<FrontierEntry>,

    /// Hashes of in-queue URLs; enforces the at-most-once invariant
    in_queue: HashSet<u64>,

    /// Dequeue order comparator selector
    order: CrawlOrder,

    /// Next insertion sequence number
    next_seq: u64,

    /// In-RAM capacity; `is_near_capacity` drives the livelock safety valve
    capacity: usize,
}

impl UrlFrontier {
    /// Creates an empty frontier
    pub fn new(order: CrawlOrder, capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            in_queue: HashSet::new(),
            order,
            next_seq: 0,
            capacity,
        }
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the queue is at or above 90% of its RAM capacity
    pub fn is_near_capacity(&self) -> bool {
        self.entries.len() * 10 >= self.capacity * 9
    }

    /// Returns true if this URL is currently queued
    pub fn contains(&self, url: &str) -> bool {
        self.in_queue.contains(&url_hash(url))
    }

    /// Positional read without removal
    ///
    /// Index 0 is the next URL to dequeue; increasing indices walk the
    /// queue in dequeue order. A slot failing its sanity check yields
    /// `CorruptSlot`; the caller discards it and continues.
    pub fn peek(&self, i: usize) -> Result<&FrontierEntry, FrontierError> {
        let entry = self.entries.get(i).ok_or(FrontierError::NotFound)?;
        if !entry.is_well_formed() {
            return Err(FrontierError::CorruptSlot(i));
        }
        Ok(entry)
    }

    /// Inserts one entry; returns false on duplicate
    ///
    /// In-queue duplicates are rejected. Callers must have already
    /// consulted the seen-url filter.
    pub fn add_entry(&mut self, url: String, weight: f64, crawl_delay: u32, flag: UrlFlag) -> bool {
        let hash = url_hash(&url);
        if self.in_queue.contains(&hash) {
            return false;
        }

        let entry = FrontierEntry {
            url,
            weight,
            crawl_delay,
            flag,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let pos = self
            .entries
            .partition_point(|e| self.compare(e, &entry) != Ordering::Greater);
        self.entries.insert(pos, entry);
        self.in_queue.insert(hash);
        self.maybe_normalize();
        true
    }

    /// Removes a URL by value; idempotent
    pub fn remove(&mut self, url: &str) {
        self.remove_hash(url_hash(url));
    }

    /// Removes a URL by its hash; idempotent
    pub fn remove_hash(&mut self, hash: u64) {
        if !self.in_queue.remove(&hash) {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|e| url_hash(&e.url) == hash) {
            self.entries.remove(pos);
        }
    }

    /// Removes and returns the slot at position `i`
    pub fn take(&mut self, i: usize) -> Option<FrontierEntry> {
        if i >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(i);
        self.in_queue.remove(&url_hash(&entry.url));
        Some(entry)
    }

    /// Adjusts the weight of a queued URL
    ///
    /// Used when the same URL is rediscovered with a different importance:
    /// `additive` adds `delta` to the current weight, otherwise `delta`
    /// replaces it. The entry is re-positioned; its FIFO sequence is kept
    /// so equal-weight ordering stays stable.
    pub fn adjust_weight(&mut self, url: &str, delta: f64, additive: bool) -> Result<(), FrontierError> {
        let hash = url_hash(url);
        let pos = self
            .entries
            .iter()
            .position(|e| url_hash(&e.url) == hash)
            .ok_or(FrontierError::NotFound)?;

        let mut entry = self.entries.remove(pos);
        entry.weight = if additive { entry.weight + delta } else { delta };

        let new_pos = self
            .entries
            .partition_point(|e| self.compare(e, &entry) != Ordering::Greater);
        self.entries.insert(new_pos, entry);
        self.maybe_normalize();
        Ok(())
    }

    /// Records a scheduling flag on a queued URL without moving it
    pub fn set_flag(&mut self, url: &str, flag: UrlFlag) -> Result<(), FrontierError> {
        let hash = url_hash(url);
        let entry = self
            .entries
            .iter_mut()
            .find(|e| url_hash(&e.url) == hash)
            .ok_or(FrontierError::NotFound)?;
        entry.flag = flag;
        Ok(())
    }

    /// Drains every entry, clearing the queue
    ///
    /// Used by the reschedule safety valve: the drained entries are dumped
    /// back to schedule files without being marked seen.
    pub fn drain_all(&mut self) -> Vec<FrontierEntry> {
        self.in_queue.clear();
        std::mem::take(&mut self.entries)
    }

    /// Iterates entries in dequeue order
    pub fn iter(&self) -> impl Iterator<Item = &FrontierEntry> {
        self.entries.iter()
    }

    /// Dequeue-order comparator
    ///
    /// Page-importance: weight descending, FIFO ties. Breadth-first:
    /// pure FIFO regardless of weight.
    fn compare(&self, a: &FrontierEntry, b: &FrontierEntry) -> Ordering {
        match self.order {
            CrawlOrder::PageImportance => b
                .weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then(a.seq.cmp(&b.seq)),
            CrawlOrder::BreadthFirst => a.seq.cmp(&b.seq),
        }
    }

    /// Rescales all weights when the minimum drops below the floor
    ///
    /// Housekeeping only: multiplying every weight by the same positive
    /// factor cannot reorder the sorted array, so equal-weight FIFO order
    /// is untouched.
    fn maybe_normalize(&mut self) {
        let min = self
            .entries
            .iter()
            .map(|e| e.weight)
            .filter(|w| *w > 0.0)
            .fold(f64::INFINITY, f64::min);

        if min.is_finite() && min < MIN_WEIGHT_FLOOR {
            let factor = RESCALE_TARGET / min;
            tracing::debug!(min_weight = min, factor, "Rescaling frontier weights");
            for entry in &mut self.entries {
                entry.weight *= factor;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn importance_frontier() -> UrlFrontier {
        UrlFrontier::new(CrawlOrder::PageImportance, 1000)
    }

    fn add(frontier: &mut UrlFrontier, pairs: Vec<(String, f64)>) -> usize {
        pairs
            .into_iter()
            .filter(|(url, weight)| frontier.add_entry(url.clone(), *weight, 0, UrlFlag::None))
            .count()
    }

    #[test]
    fn test_weight_order_dequeue() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![
            ("https://a.example/".to_string(), 5.0),
            ("https://b.example/".to_string(), 3.0),
            ("https://c.example/".to_string(), 8.0),
        ]);

        // Peek sequence across increasing index is non-increasing in weight
        let urls: Vec<&str> = (0..3)
            .map(|i| frontier.peek(i).unwrap().url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec!["https://c.example/", "https://a.example/", "https://b.example/"]
        );
    }

    #[test]
    fn test_no_duplicate_enqueue() {
        let mut frontier = importance_frontier();
        let inserted = add(&mut frontier, vec![
            ("https://a.example/".to_string(), 1.0),
            ("https://a.example/".to_string(), 2.0),
        ]);
        assert_eq!(inserted, 1);
        assert_eq!(frontier.len(), 1);

        // Rediscovery goes through adjust_weight, not a second insert
        let inserted = add(&mut frontier, vec![("https://a.example/".to_string(), 9.0)]);
        assert_eq!(inserted, 0);
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_equal_weight_fifo_tie_break() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![
            ("https://first.example/".to_string(), 2.0),
            ("https://second.example/".to_string(), 2.0),
            ("https://third.example/".to_string(), 2.0),
        ]);

        let urls: Vec<&str> = (0..3)
            .map(|i| frontier.peek(i).unwrap().url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://first.example/",
                "https://second.example/",
                "https://third.example/"
            ]
        );
    }

    #[test]
    fn test_breadth_first_insertion_order() {
        let mut frontier = UrlFrontier::new(CrawlOrder::BreadthFirst, 1000);
        add(&mut frontier, vec![
            ("https://low.example/".to_string(), 1.0),
            ("https://high.example/".to_string(), 100.0),
        ]);

        // Weight is ignored; insertion order wins
        assert_eq!(frontier.peek(0).unwrap().url, "https://low.example/");
        assert_eq!(frontier.peek(1).unwrap().url, "https://high.example/");
    }

    #[test]
    fn test_remove_idempotent() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![("https://a.example/".to_string(), 1.0)]);

        frontier.remove("https://a.example/");
        assert!(frontier.is_empty());
        // Second remove is a no-op
        frontier.remove("https://a.example/");
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_adjust_weight_repositions() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![
            ("https://a.example/".to_string(), 5.0),
            ("https://b.example/".to_string(), 3.0),
        ]);

        frontier
            .adjust_weight("https://b.example/", 10.0, true)
            .unwrap();
        assert_eq!(frontier.peek(0).unwrap().url, "https://b.example/");
        assert_eq!(frontier.peek(0).unwrap().weight, 13.0);

        frontier
            .adjust_weight("https://b.example/", 1.0, false)
            .unwrap();
        assert_eq!(frontier.peek(0).unwrap().url, "https://a.example/");
    }

    #[test]
    fn test_set_flag_preserves_position() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![
            ("https://a.example/".to_string(), 5.0),
            ("https://b.example/".to_string(), 3.0),
        ]);

        frontier
            .set_flag("https://a.example/", UrlFlag::SchedulableDelayed(30))
            .unwrap();
        let entry = frontier.peek(0).unwrap();
        assert_eq!(entry.url, "https://a.example/");
        assert_eq!(entry.flag, UrlFlag::SchedulableDelayed(30));
    }

    #[test]
    fn test_normalization_preserves_order() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![
            ("https://a.example/".to_string(), 4.0e-8),
            ("https://b.example/".to_string(), 2.0e-8),
            ("https://c.example/".to_string(), 2.0e-8),
        ]);

        // Weights were rescaled above the floor
        assert!(frontier.peek(0).unwrap().weight >= 1.0);

        // Relative and FIFO order intact
        let urls: Vec<&str> = (0..3)
            .map(|i| frontier.peek(i).unwrap().url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec!["https://a.example/", "https://b.example/", "https://c.example/"]
        );
    }

    #[test]
    fn test_corrupt_slot_detected() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![("https://a.example/".to_string(), 1.0)]);
        // Corrupt the slot directly
        frontier.entries[0].weight = f64::NAN;

        assert!(matches!(
            frontier.peek(0),
            Err(FrontierError::CorruptSlot(0))
        ));
    }

    #[test]
    fn test_near_capacity() {
        let mut frontier = UrlFrontier::new(CrawlOrder::PageImportance, 10);
        for i in 0..9 {
            add(&mut frontier, vec![(format!("https://x{}.example/", i), 1.0)]);
        }
        assert!(frontier.is_near_capacity());
    }

    #[test]
    fn test_drain_all_clears_membership() {
        let mut frontier = importance_frontier();
        add(&mut frontier, vec![("https://a.example/".to_string(), 1.0)]);

        let drained = frontier.drain_all();
        assert_eq!(drained.len(), 1);
        assert!(frontier.is_empty());
        // Re-offer is allowed after a drain
        assert_eq!(add(&mut frontier, vec![("https://a.example/".to_string(), 1.0)]), 1);
    }
}
