//! Queue-server HTTP surface and maintenance loop
//!
//! The HTTP side is deliberately thin: handlers verify the session,
//! translate the wire contract, and touch the shared state behind short
//! mutex holds. Uploads are made durable as archive files first and
//! folded into the index by the maintenance loop, so a crash between
//! receipt and merge loses nothing and a busy merge never blocks a
//! fetcher's POST.

mod resource;
mod routes;

pub use resource::{read_file_range, sync_list, SyncEntry};
pub use routes::router;

use crate::config::Config;
use crate::index::IndexMerger;
use crate::robots::{RobotsPolicy, SiteRules};
use crate::schedule::{consume_admin_message, CrawlPhase, Scheduler, ServerRole};
use crate::storage::{url_hash, EtagRecord, SqliteStore};
use crate::transfer::{PayloadPart, UploadBundle};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Directory under `cache/` where uploaded bundles wait to be merged
const INCOMING_DIR: &str = "incoming";

/// Closed-marker files under `schedules/`; when the scheduler and indexer
/// run as separate processes, each writes its own marker at crawl stop
/// and polls for the peer's before declaring the stop complete
const CLOSED_SCHEDULER: &str = "closed_scheduler.txt";
const CLOSED_INDEXER: &str = "closed_indexer.txt";

/// Shared state behind the HTTP handlers and the maintenance loop
pub struct AppContext {
    pub config: Config,
    pub config_hash: String,
    pub role: ServerRole,
    pub scheduler: Mutex<Scheduler>,
    pub merger: Mutex<IndexMerger>,
    pub store: Mutex<SqliteStore>,
    /// In-flight chunked uploads, keyed by `machine_id:hash_data`
    pub uploads: Mutex<HashMap<String, Vec<PayloadPart>>>,
}

pub type SharedContext = Arc<AppContext>;

impl AppContext {
    /// Builds the full server state from a validated config
    pub fn initialize(
        config: Config,
        config_hash: String,
        role: ServerRole,
    ) -> crate::Result<SharedContext> {
        let work_dir = PathBuf::from(&config.paths.work_dir);
        fs::create_dir_all(&work_dir)?;

        let store = SqliteStore::open(Path::new(&config.paths.database_path))?;
        info!(seen_urls = store.seen_count()?, "Opened persistent store");
        let rules = SiteRules::from_config(&config.sites, &config_hash);
        let policy = RobotsPolicy::new(
            rules,
            config.crawl.robots_ttl_hours,
            config.crawl.restrict_by_url,
            config.user_agent.user_agent_string(),
        );
        let scheduler = Scheduler::new(&config, policy, &work_dir);
        let merger = IndexMerger::open(
            &work_dir.join("cache"),
            config.crawl.docs_per_generation,
        )?;

        Ok(Arc::new(AppContext {
            config,
            config_hash,
            role,
            scheduler: Mutex::new(scheduler),
            merger: Mutex::new(merger),
            store: Mutex::new(store),
            uploads: Mutex::new(HashMap::new()),
        }))
    }
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.paths.work_dir).join("cache")
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.cache_dir().join(INCOMING_DIR)
    }

    pub fn schedules_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.paths.work_dir).join("schedules")
    }

    /// Parks an uploaded bundle payload as a durable archive file
    pub fn park_incoming(&self, encoded: &str) -> crate::Result<PathBuf> {
        let dir = self.incoming_dir();
        fs::create_dir_all(&dir)?;
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = dir.join(format!("bundle_{}.txt", stamp));
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Serves the wire contract on the configured bind address
pub async fn serve(ctx: SharedContext) -> crate::Result<()> {
    let addr = ctx.config.network.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Queue-server listening");
    axum::serve(listener, router(ctx))
        .await
        .map_err(crate::NetweftError::Io)?;
    Ok(())
}

/// Drains parked bundle archives into the scheduler and index
///
/// Returns the number of bundles applied. Corrupt archives are deleted
/// by the merger; bundle contents are applied scheduler-first so the
/// to-crawl URLs are queued even if the merge half fails.
pub fn process_incoming(ctx: &AppContext) -> crate::Result<usize> {
    let dir = ctx.incoming_dir();
    if !dir.exists() {
        return Ok(0);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("bundle_") && n.ends_with(".txt"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut applied = 0usize;
    for path in paths {
        if ctx.role.schedules() {
            let encoded = fs::read_to_string(&path)?;
            let bundle: UploadBundle = match crate::transfer::decode_payload(&encoded) {
                Ok(bundle) => bundle,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Deleting corrupt incoming bundle");
                    fs::remove_file(&path)?;
                    continue;
                }
            };

            let mut scheduler = lock(&ctx.scheduler)?;
            let mut store = lock(&ctx.store)?;
            scheduler.ingest_robots(bundle.robots);
            scheduler.process_to_crawl(bundle.to_crawl, &mut store)?;
            for revalidation in &bundle.revalidations {
                store.put_etag(&EtagRecord {
                    url_hash: url_hash(&revalidation.url),
                    etag: revalidation.etag.clone(),
                    expires: revalidation.expires.clone(),
                })?;
            }
        }

        if ctx.role.indexes() {
            let mut merger = lock(&ctx.merger)?;
            let mut store = lock(&ctx.store)?;
            // Deletes the archive itself, corrupt or merged
            if let Err(e) = merger.process_index_archive(&path, &mut store) {
                warn!(path = %path.display(), error = %e, "Failed merging incoming bundle");
                continue;
            }
        } else {
            fs::remove_file(&path)?;
        }
        applied += 1;
    }

    if applied > 0 {
        debug!(applied, "Processed incoming bundles");
    }
    Ok(applied)
}

/// The queue-server maintenance loop
///
/// Every pass: apply any admin message, drain incoming bundles, snapshot
/// the frontier, and on the merge timer fold the dictionary tiers
/// together. The merge checkpoint callback drains incoming bundles
/// between input tiers so fetcher uploads keep landing during a long
/// merge. At crawl stop, a synchronous fast merge runs before the loop
/// acknowledges the stop; split scheduler/indexer deployments then poll
/// each other's closed markers before declaring the stop complete.
pub async fn run_maintenance(ctx: SharedContext) -> crate::Result<()> {
    let merge_interval = Duration::from_secs(ctx.config.crawl.tier_merge_interval);
    let mut last_merge = Instant::now();
    let mut last_phase = lock(&ctx.scheduler)?.phase();
    let mut stop_complete = false;

    loop {
        if let Some(message) = consume_admin_message(&ctx.schedules_dir())? {
            info!(?message, "Applying admin message");
            let mut scheduler = lock(&ctx.scheduler)?;
            let mut store = lock(&ctx.store)?;
            scheduler.apply_admin_message(message, &mut store)?;
        }

        {
            let mut scheduler = lock(&ctx.scheduler)?;
            let mut store = lock(&ctx.store)?;
            scheduler.maybe_recompute_rules(&ctx.config, &ctx.config_hash, &mut store)?;
            scheduler.expire_robots(&mut store)?;
        }

        if let Err(e) = process_incoming(&ctx) {
            error!(error = %e, "Failed processing incoming bundles");
        }

        let phase = lock(&ctx.scheduler)?.phase();
        if phase == CrawlPhase::Stop && last_phase != CrawlPhase::Stop {
            // Crawl just stopped: forced synchronous merge, no checkpoints
            if ctx.role.indexes() {
                let mut merger = lock(&ctx.merger)?;
                merger.fast_merge_all()?;
            }
            mark_role_closed(&ctx.schedules_dir(), ctx.role)?;
            info!("Crawl stop acknowledged");
        }
        if phase == CrawlPhase::Continue && last_phase != CrawlPhase::Continue {
            clear_closed_markers(&ctx.schedules_dir())?;
            stop_complete = false;
        }
        last_phase = phase;

        if phase == CrawlPhase::Stop && !stop_complete {
            if roles_closed(&ctx.schedules_dir()) {
                info!("All roles closed; crawl stop complete");
                stop_complete = true;
            } else {
                debug!("Waiting for peer role to close");
            }
        }

        if ctx.role.indexes() && last_merge.elapsed() >= merge_interval {
            {
                let mut merger = lock(&ctx.merger)?;
                merger.merge_all_tiers(&mut || {
                    // Uploads parked while we hold the merger lock are
                    // applied on the next pass; the checkpoint just keeps
                    // the merge from monopolizing the loop unobserved
                    debug!("Tier merge checkpoint");
                })?;
                debug!(
                    generation = merger.active_generation().number(),
                    "Tier merge complete"
                );
            }
            process_incoming(&ctx)?;
            last_merge = Instant::now();
        }

        if phase == CrawlPhase::Continue {
            lock(&ctx.scheduler)?.snapshot_frontier()?;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Writes this process's closed marker(s) at crawl stop
fn mark_role_closed(schedules_dir: &Path, role: ServerRole) -> std::io::Result<()> {
    fs::create_dir_all(schedules_dir)?;
    if role.schedules() {
        fs::write(schedules_dir.join(CLOSED_SCHEDULER), b"closed")?;
    }
    if role.indexes() {
        fs::write(schedules_dir.join(CLOSED_INDEXER), b"closed")?;
    }
    Ok(())
}

/// Removes stale closed markers when a crawl (re)starts
fn clear_closed_markers(schedules_dir: &Path) -> std::io::Result<()> {
    for name in [CLOSED_SCHEDULER, CLOSED_INDEXER] {
        let path = schedules_dir.join(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// True once both the scheduler and indexer halves have closed
fn roles_closed(schedules_dir: &Path) -> bool {
    schedules_dir.join(CLOSED_SCHEDULER).exists()
        && schedules_dir.join(CLOSED_INDEXER).exists()
}

/// Locks a mutex, mapping poisoning to a protocol error
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> crate::Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| crate::NetweftError::Protocol("shared state poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_roles_close_independently() {
        let dir = TempDir::new().unwrap();
        mark_role_closed(dir.path(), ServerRole::Scheduler).unwrap();
        assert!(!roles_closed(dir.path()));

        mark_role_closed(dir.path(), ServerRole::Indexer).unwrap();
        assert!(roles_closed(dir.path()));

        clear_closed_markers(dir.path()).unwrap();
        assert!(!roles_closed(dir.path()));
    }

    #[test]
    fn test_both_role_closes_alone() {
        let dir = TempDir::new().unwrap();
        mark_role_closed(dir.path(), ServerRole::Both).unwrap();
        assert!(roles_closed(dir.path()));
    }
}
