//! Per-host robots record cache with TTL expiry

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Robots state for one host, created when a robots.txt download completes
#[derive(Debug, Clone)]
pub struct RobotsRecord {
    pub host: String,
    pub robots: ParsedRobots,
    /// Crawl-delay in whole seconds; 0 means none
    pub crawl_delay: u32,
    /// Peer addresses robots.txt was served from, as reported by fetchers
    pub ip_addresses: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RobotsRecord {
    pub fn new(
        host: String,
        robots: ParsedRobots,
        crawl_delay: u32,
        ip_addresses: Vec<String>,
    ) -> Self {
        Self {
            host,
            robots,
            crawl_delay,
            ip_addresses,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        self.robots.is_allowed(path, user_agent)
    }
}

/// Host-keyed robots record cache
///
/// Records older than the TTL are treated as absent, which forces the
/// scheduler to re-schedule the host's robots.txt.
pub struct RobotsCache {
    records: HashMap<String, RobotsRecord>,
    ttl: Duration,
}

impl RobotsCache {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            records: HashMap::new(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Looks up a live record; stale records are invisible
    pub fn get(&self, host: &str) -> Option<&RobotsRecord> {
        self.records
            .get(host)
            .filter(|record| Utc::now() - record.fetched_at <= self.ttl)
    }

    /// Inserts or replaces a host's record
    pub fn insert(&mut self, record: RobotsRecord) {
        self.records.insert(record.host.clone(), record);
    }

    /// Drops stale records, returning the hosts that expired
    ///
    /// The scheduler forgets these hosts in the robots-known filter so
    /// their robots.txt is re-fetched.
    pub fn evict_stale(&mut self) -> Vec<String> {
        let now = Utc::now();
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| now - r.fetched_at > ttl)
            .map(|(host, _)| host.clone())
            .collect();
        for host in &expired {
            self.records.remove(host);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
