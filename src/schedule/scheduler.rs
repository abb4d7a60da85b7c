//! The scheduler proper: frontier scans and batch production
//!
//! One scheduler instance owns the in-RAM frontier and the robots policy.
//! Batch production is a single pass over the frontier from the
//! highest-weight end; every URL the pass either admits or rejects as
//! unservable is removed from the frontier in that same pass, so one
//! batch costs at most one full scan.
//!
//! Slot timing model: a batch's slots are fetched in bursts of
//! `num-multi-fetch-pages`, one burst at a time, so consecutive bursts are
//! roughly a second apart on the fetcher. A host with crawl-delay `d`
//! therefore gets its next slot at least `d` bursts after its previous
//! one, and its entry in `waiting_hosts` holds the wall-clock second it
//! becomes admissible again across batches.

use crate::config::{Config, CrawlOrder};
use crate::frontier::{
    dump_schedule, load_schedule_dir, FrontierError, ScheduleMeta, UrlFlag, UrlFrontier,
};
use crate::robots::{RobotsPolicy, RobotsResponse, SiteRules};
use crate::schedule::{AdminMessage, AdminStatus, CrawlPhase, FetchBatch, UrlSlot};
use crate::storage::{url_hash, SqliteStore};
use crate::transfer::{CrawlParameters, DiscoveredUrl, RobotsUpload};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// Weight given to implicit robots.txt URLs so they outrank page URLs
const ROBOTS_WEIGHT: f64 = 1.0e9;

/// Crawl-state keys in the persistent store
const STATE_CRAWL_TIME: &str = "crawl_time";
const STATE_PHASE: &str = "crawl_phase";
const STATE_CONFIG_HASH: &str = "config_hash";

pub struct Scheduler {
    order: CrawlOrder,
    max_fetch_size: usize,
    num_multi_fetch_pages: usize,
    max_waiting_hosts: usize,
    schedules_dir: PathBuf,
    frontier: UrlFrontier,
    policy: RobotsPolicy,
    phase: CrawlPhase,
    crawl_time: u64,
    /// host -> epoch second when the host may be scheduled again
    waiting_hosts: HashMap<String, u64>,
}

impl Scheduler {
    pub fn new(config: &Config, policy: RobotsPolicy, work_dir: &Path) -> Self {
        Scheduler {
            order: config.crawl.crawl_order,
            max_fetch_size: config.crawl.max_fetch_size,
            num_multi_fetch_pages: config.crawl.num_multi_fetch_pages.max(1),
            max_waiting_hosts: config.crawl.max_waiting_hosts,
            schedules_dir: work_dir.join("schedules"),
            frontier: UrlFrontier::new(config.crawl.crawl_order, config.crawl.max_queue_size),
            policy,
            phase: CrawlPhase::WaitingStart,
            crawl_time: 0,
            waiting_hosts: HashMap::new(),
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Active crawl timestamp; 0 while no crawl is running
    pub fn crawl_time(&self) -> u64 {
        match self.phase {
            CrawlPhase::Continue => self.crawl_time,
            _ => 0,
        }
    }

    pub fn schedules_dir(&self) -> &Path {
        &self.schedules_dir
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// The crawl-parameter struct served by `a=crawlTime`
    pub fn crawl_parameters(&self, config: &Config) -> CrawlParameters {
        CrawlParameters {
            crawl_time: self.crawl_time(),
            crawl_order: match self.order {
                CrawlOrder::PageImportance => "page-importance".to_string(),
                CrawlOrder::BreadthFirst => "breadth-first".to_string(),
            },
            queue_servers: config.network.queue_servers.clone(),
            allowed_sites: config.sites.allowed.clone(),
            disallowed_sites: config.sites.disallowed.clone(),
        }
    }

    /// Applies one operator command from the admin message file
    pub fn apply_admin_message(
        &mut self,
        message: AdminMessage,
        store: &mut SqliteStore,
    ) -> crate::Result<()> {
        match message.status {
            AdminStatus::NewCrawl => self.start_crawl(message.crawl_time, store),
            AdminStatus::StopCrawl => self.stop_crawl(store),
            AdminStatus::ResumeCrawl => self.resume_crawl(store),
        }
    }

    pub fn start_crawl(&mut self, crawl_time: u64, store: &mut SqliteStore) -> crate::Result<()> {
        info!(crawl_time, "Starting new crawl");
        self.crawl_time = crawl_time;
        self.phase = CrawlPhase::Continue;
        self.waiting_hosts.clear();
        store.set_state(STATE_CRAWL_TIME, &crawl_time.to_string())?;
        store.set_state(STATE_PHASE, "CONTINUE")?;
        Ok(())
    }

    /// Stops the crawl and persists the frontier to schedule files
    pub fn stop_crawl(&mut self, store: &mut SqliteStore) -> crate::Result<()> {
        info!(crawl_time = self.crawl_time, queued = self.frontier.len(), "Stopping crawl");
        self.reschedule_all()?;
        self.phase = CrawlPhase::Stop;
        store.set_state(STATE_PHASE, "STOP")?;
        Ok(())
    }

    /// Re-enters `Continue` from saved crawl state and schedule files
    pub fn resume_crawl(&mut self, store: &mut SqliteStore) -> crate::Result<()> {
        let crawl_time: u64 = store
            .require_state(STATE_CRAWL_TIME)?
            .parse()
            .map_err(|_| crate::NetweftError::Protocol("bad saved crawl_time".to_string()))?;

        let records = load_schedule_dir(&self.schedules_dir)?;
        let mut reloaded = 0usize;
        for (url, weight, delay) in records {
            let flag = if url.ends_with("/robots.txt") {
                UrlFlag::Robot
            } else {
                UrlFlag::None
            };
            if self.frontier.add_entry(url, weight as f64, delay, flag) {
                reloaded += 1;
            }
        }

        self.crawl_time = crawl_time;
        self.phase = CrawlPhase::Continue;
        store.set_state(STATE_PHASE, "CONTINUE")?;
        info!(crawl_time, reloaded, "Resumed crawl from saved state");
        Ok(())
    }

    /// Ingests robots.txt downloads reported by fetchers
    pub fn ingest_robots(&mut self, uploads: Vec<RobotsUpload>) {
        for upload in uploads {
            self.policy.ingest_robots(RobotsResponse {
                host: upload.host,
                status: upload.status,
                body: upload.body,
                ip_addresses: upload.ip_addresses,
            });
        }
    }

    /// Ingests a fetcher's discovered-URL list
    ///
    /// Already-seen URLs are dropped by set difference before anything is
    /// inserted. Hosts whose robots state is unknown get one implicit
    /// robots.txt URL each, deduplicated by host across the whole crawl
    /// via the persistent robots-known filter.
    pub fn process_to_crawl(
        &mut self,
        discovered: Vec<DiscoveredUrl>,
        store: &mut SqliteStore,
    ) -> crate::Result<usize> {
        let hashes: Vec<u64> = discovered.iter().map(|d| url_hash(&d.url)).collect();
        let unseen: std::collections::HashSet<u64> =
            store.filter_unseen(&hashes)?.into_iter().collect();

        let mut added = 0usize;
        for (item, hash) in discovered.into_iter().zip(hashes) {
            if !unseen.contains(&hash) {
                continue;
            }
            let Ok(parsed) = Url::parse(&item.url) else {
                continue;
            };
            let Some(host) = parsed.host_str().map(str::to_string) else {
                continue;
            };

            if !self
                .frontier
                .add_entry(item.url.clone(), item.weight as f64, 0, UrlFlag::None)
            {
                // Rediscovery: the link's weight accumulates onto the
                // queued entry instead of inserting a duplicate
                self.frontier
                    .adjust_weight(&item.url, item.weight as f64, true)
                    .ok();
                continue;
            }
            added += 1;

            let host_key = url_hash(&host);
            if !store.is_robots_known(host_key)? && !self.policy.has_record(&host) {
                let robots_url = format!("{}://{}/robots.txt", parsed.scheme(), host);
                if self
                    .frontier
                    .add_entry(robots_url, ROBOTS_WEIGHT, 0, UrlFlag::Robot)
                {
                    store.mark_robots_known(host_key)?;
                }
            }
        }

        debug!(added, "Ingested to-crawl list");
        Ok(added)
    }

    /// Produces the next fetch batch, or None when nothing is servable
    ///
    /// One single-threaded scan from the top of the frontier. Robots URLs
    /// take the next free slot; normal URLs are gated on robots-known,
    /// quota (checked first), etag freshness, and crawl-delay placement.
    /// Admitted and unservable URLs are removed in one pass; deferred ones
    /// stay queued for a later batch.
    pub fn produce_fetch_batch(
        &mut self,
        store: &SqliteStore,
    ) -> crate::Result<Option<FetchBatch>> {
        if self.phase != CrawlPhase::Continue {
            return Ok(None);
        }

        let now = Utc::now();
        let now_secs = now.timestamp() as u64;
        self.waiting_hosts.retain(|_, until| *until > now_secs);

        let nmp = self.num_multi_fetch_pages;
        let mut slots: Vec<UrlSlot> = vec![UrlSlot::Dummy; self.max_fetch_size];
        let mut filled = 0usize;
        let mut consumed: Vec<u64> = Vec::new();
        let mut corrupt: Vec<usize> = Vec::new();
        // Per-batch floor on the next slot index each host may occupy
        let mut host_floor: HashMap<String, usize> = HashMap::new();

        let len = self.frontier.len();
        let mut i = 0;
        while filled < self.max_fetch_size && i < len {
            let entry = match self.frontier.peek(i) {
                Ok(entry) => entry.clone(),
                Err(FrontierError::CorruptSlot(index)) => {
                    corrupt.push(index);
                    i += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            i += 1;

            if entry.flag == UrlFlag::Robot {
                if let Some(slot) = first_free(&slots, 0) {
                    slots[slot] = UrlSlot::Url {
                        url: entry.url.clone(),
                        weight: entry.weight as f32,
                        crawl_delay: 0,
                    };
                    consumed.push(url_hash(&entry.url));
                    filled += 1;
                }
                continue;
            }

            let Some(host) = host_of(&entry.url) else {
                consumed.push(url_hash(&entry.url));
                continue;
            };

            // The robots verdict is cached on the entry, so a deferred
            // URL skips the policy lookup on later scans
            let delay = match entry.flag {
                UrlFlag::Schedulable => 0,
                UrlFlag::SchedulableDelayed(d) => d,
                _ => {
                    // Policy violations are filtered silently, not logged
                    if !self.policy.is_allowed(&entry.url) {
                        consumed.push(url_hash(&entry.url));
                        continue;
                    }
                    // Robots still in flight for this host; leave queued
                    if !self.policy.has_record(&host) {
                        continue;
                    }
                    let d = self.policy.crawl_delay(&host);
                    let flag = if d == 0 {
                        UrlFlag::Schedulable
                    } else {
                        UrlFlag::SchedulableDelayed(d)
                    };
                    self.frontier.set_flag(&entry.url, flag).ok();
                    d
                }
            };

            // A cached copy that has not expired needs no re-fetch
            if store.is_unexpired(url_hash(&entry.url), now)? {
                consumed.push(url_hash(&entry.url));
                continue;
            }

            // Quota before crawl-delay; over-quota defers, never drops
            if !self.policy.within_quota(&entry.url) {
                continue;
            }

            let floor = if delay == 0 {
                host_floor.get(&host).copied().unwrap_or(0)
            } else {
                if self.waiting_hosts.len() >= self.max_waiting_hosts
                    && !self.waiting_hosts.contains_key(&host)
                {
                    continue;
                }
                let wait_floor = self
                    .waiting_hosts
                    .get(&host)
                    .map(|until| until.saturating_sub(now_secs) as usize * nmp)
                    .unwrap_or(0);
                wait_floor.max(host_floor.get(&host).copied().unwrap_or(0))
            };

            let Some(slot) = first_free(&slots, floor) else {
                // No delay-respecting slot left this batch
                continue;
            };

            slots[slot] = UrlSlot::Url {
                url: entry.url.clone(),
                weight: entry.weight as f32,
                crawl_delay: delay,
            };
            filled += 1;
            consumed.push(url_hash(&entry.url));
            self.policy.record_download(&entry.url);

            if delay > 0 {
                let burst = slot / nmp;
                host_floor.insert(host.clone(), (burst + delay as usize) * nmp);
                self.waiting_hosts
                    .insert(host, now_secs + burst as u64 + delay as u64);
            } else {
                host_floor.insert(host, slot + 1);
            }
        }

        // Corrupt slots are discarded, highest index first so the
        // remaining indices stay valid
        corrupt.sort_unstable_by(|a, b| b.cmp(a));
        for index in corrupt {
            if let Some(entry) = self.frontier.take(index) {
                warn!(url = %entry.url, "Discarded corrupt frontier slot");
            }
        }
        for hash in consumed {
            self.frontier.remove_hash(hash);
        }

        if filled == 0 {
            if self.frontier.is_near_capacity() {
                // Livelock safety valve: nothing schedulable and the queue
                // is jammed full. Dump everything back to schedule files
                // without marking seen and clear the RAM queue.
                warn!(
                    queued = self.frontier.len(),
                    "No servable URLs in a near-full frontier; rescheduling all to disk"
                );
                self.reschedule_all()?;
            }
            return Ok(None);
        }

        // Trim trailing dummies; they carry no spacing information
        while matches!(slots.last(), Some(UrlSlot::Dummy)) {
            slots.pop();
        }

        debug!(urls = filled, slots = slots.len(), "Produced fetch batch");
        Ok(Some(FetchBatch {
            crawl_time: self.crawl_time,
            slots,
        }))
    }

    /// Dumps the whole frontier to schedule files without marking seen
    /// and clears the RAM queue
    pub fn reschedule_all(&mut self) -> crate::Result<()> {
        let entries = self.frontier.drain_all();
        if entries.is_empty() {
            return Ok(());
        }
        let meta = ScheduleMeta {
            crawl_time: self.crawl_time,
            num_records: entries.len(),
        };
        dump_schedule(&self.schedules_dir, &meta, &entries)?;
        Ok(())
    }

    /// Snapshots the frontier to disk, replacing earlier snapshots
    ///
    /// Crash insurance between batches; on resume the snapshot is
    /// reloaded and consumed.
    pub fn snapshot_frontier(&self) -> crate::Result<()> {
        fs::create_dir_all(&self.schedules_dir)?;
        for entry in fs::read_dir(&self.schedules_dir)? {
            let path = entry?.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("schedule_") && n.ends_with(".txt"))
                .unwrap_or(false);
            if stale {
                fs::remove_file(path)?;
            }
        }

        let entries: Vec<_> = self.frontier.iter().cloned().collect();
        if entries.is_empty() {
            return Ok(());
        }
        let meta = ScheduleMeta {
            crawl_time: self.crawl_time,
            num_records: entries.len(),
        };
        dump_schedule(&self.schedules_dir, &meta, &entries)?;
        Ok(())
    }

    /// Drops robots records past their TTL and forgets the hosts in the
    /// persistent robots-known filter, so their robots.txt is
    /// re-scheduled the next time a URL for the host arrives
    pub fn expire_robots(&mut self, store: &mut SqliteStore) -> crate::Result<()> {
        let expired = self.policy.evict_stale_robots();
        if expired.is_empty() {
            return Ok(());
        }
        for host in &expired {
            store.forget_robots(url_hash(host))?;
        }
        debug!(hosts = expired.len(), "Expired stale robots records");
        Ok(())
    }

    /// Re-applies site rules when the config hash changed
    ///
    /// Culls queued URLs that became non-crawlable under the new rules.
    pub fn maybe_recompute_rules(
        &mut self,
        config: &Config,
        config_hash: &str,
        store: &mut SqliteStore,
    ) -> crate::Result<()> {
        if !self.policy.rules_need_recompute(config_hash) {
            return Ok(());
        }
        info!(config_hash, "Crawl parameters changed; recomputing site rules");
        self.policy
            .recompute_rules(SiteRules::from_config(&config.sites, config_hash));
        store.set_state(STATE_CONFIG_HASH, config_hash)?;

        let culled: Vec<u64> = self
            .frontier
            .iter()
            .filter(|e| e.flag != UrlFlag::Robot && !self.policy.is_allowed(&e.url))
            .map(|e| url_hash(&e.url))
            .collect();
        for hash in &culled {
            self.frontier.remove_hash(*hash);
        }
        if !culled.is_empty() {
            info!(culled = culled.len(), "Culled newly disallowed queued URLs");
        }
        Ok(())
    }
}

/// First dummy slot at or after `from`
fn first_free(slots: &[UrlSlot], from: usize) -> Option<usize> {
    slots
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, s)| matches!(s, UrlSlot::Dummy))
        .map(|(i, _)| i)
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
