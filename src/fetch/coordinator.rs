//! The fetcher main loop
//!
//! One coordinator per fetcher process. Each loop iteration polls the
//! name server for the active crawl, pulls a batch from a pseudo-randomly
//! chosen queue-server (rotation balances load and guarantees every
//! server eventually receives this fetcher's uploads), downloads the
//! batch in bounded bursts, processes the pages, and uploads once enough
//! pages have accumulated. Errors inside an iteration are logged and the
//! loop moves on; only startup misconfiguration is fatal.

use crate::config::{Config, CrawlOrder};
use crate::fetch::processor::{doc_tag_for, DownloadedPage, ProcessorRegistry};
use crate::fetch::score::{company_domain, score_links, sitemap_link_weights};
use crate::index::{build_shard, DocKey, PageSummary};
use crate::schedule::{FetchBatch, UrlSlot};
use crate::storage::url_hash;
use crate::transfer::{
    decode_payload, session_token, ByteCounts, CrawlParameters, DiscoveredUrl, RevalidationUpload,
    RobotsUpload, UpdateStatus, UploadClient,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Per-request timeout for page downloads
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Seconds between bursts when the batch contains crawl-delayed hosts
const BURST_INTERVAL: Duration = Duration::from_secs(1);

/// Seconds slept before requests to hosts over the error threshold
const ERROR_HOST_DELAY: Duration = Duration::from_secs(1);

/// Result of one download attempt
struct DownloadResult {
    url: String,
    weight: f32,
    outcome: Result<DownloadedPage, String>,
}

pub struct FetchCoordinator {
    http: reqwest::Client,
    uploader: UploadClient,
    registry: ProcessorRegistry,
    crawl_order: CrawlOrder,
    queue_servers: Vec<String>,
    name_server: String,
    secret: String,
    machine_id: String,
    min_loop_time: Duration,
    pages_per_upload: usize,
    memory_budget: usize,
    host_error_threshold: u32,
    burst_size: usize,
    crawl_time: u64,
    rng: StdRng,
    host_errors: HashMap<String, u32>,
    pending_pages: Vec<(PageSummary, Vec<(String, f32)>)>,
    pending_links: Vec<(DocKey, String, f32)>,
    pending_to_crawl: Vec<DiscoveredUrl>,
    pending_seen: Vec<u64>,
    pending_robots: Vec<RobotsUpload>,
    pending_revalidations: Vec<RevalidationUpload>,
    stopped: bool,
}

impl FetchCoordinator {
    pub fn new(config: &Config, machine_id: String) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.user_agent_string())
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;

        let uploader = UploadClient::new(
            http.clone(),
            config.network.shared_secret.clone(),
            machine_id.clone(),
            config.network.retry_sleep,
            config.network.post_max_size,
        );

        Ok(FetchCoordinator {
            http,
            uploader,
            registry: ProcessorRegistry::standard(),
            crawl_order: config.crawl.crawl_order,
            queue_servers: config.network.queue_servers.clone(),
            name_server: config.network.name_server.clone(),
            secret: config.network.shared_secret.clone(),
            machine_id: machine_id.clone(),
            min_loop_time: Duration::from_secs(config.crawl.min_loop_time),
            pages_per_upload: config.crawl.pages_per_upload,
            memory_budget: config.crawl.memory_budget,
            host_error_threshold: config.crawl.host_error_threshold,
            burst_size: config.crawl.num_multi_fetch_pages.max(1),
            crawl_time: 0,
            rng: StdRng::seed_from_u64(url_hash(&machine_id)),
            host_errors: HashMap::new(),
            pending_pages: Vec::new(),
            pending_links: Vec::new(),
            pending_to_crawl: Vec::new(),
            pending_seen: Vec::new(),
            pending_robots: Vec::new(),
            pending_revalidations: Vec::new(),
            stopped: false,
        })
    }

    /// Runs the fetch loop until the crawl stops
    pub async fn run(&mut self) -> crate::Result<()> {
        info!(machine_id = %self.machine_id, "Fetcher loop starting");
        while !self.stopped {
            let started = Instant::now();
            if let Err(e) = self.run_once().await {
                // Component-local recovery: log and go around again
                warn!(error = %e, "Fetch iteration failed");
            }
            let elapsed = started.elapsed();
            if elapsed < self.min_loop_time {
                tokio::time::sleep(self.min_loop_time - elapsed).await;
            }
        }
        info!(machine_id = %self.machine_id, "Fetcher loop stopped");
        Ok(())
    }

    /// One loop iteration
    pub async fn run_once(&mut self) -> crate::Result<()> {
        let crawl_time = self.poll_crawl_time().await?;
        if crawl_time == 0 {
            if self.crawl_time != 0 {
                // Crawl just stopped; flush whatever we are holding
                self.upload_pending().await?;
                self.crawl_time = 0;
            }
            debug!("No active crawl");
            return Ok(());
        }
        if crawl_time != self.crawl_time {
            info!(crawl_time, "Switching to new crawl");
            self.clear_pending();
            self.host_errors.clear();
            self.crawl_time = crawl_time;
        }

        let server = self.pick_queue_server();
        match self.request_batch(&server).await? {
            Some(batch) => self.run_batch(batch).await,
            None => {
                // No work from this server; use the slot to upload
                self.upload_pending().await?;
                return Ok(());
            }
        }

        if self.pending_pages.len() >= self.pages_per_upload {
            self.upload_pending().await?;
        } else if self.exceed_memory_threshold() {
            warn!(
                bytes = self.approximate_memory(),
                budget = self.memory_budget,
                "Memory threshold exceeded; forcing upload"
            );
            self.upload_pending().await?;
        }
        Ok(())
    }

    /// True when pending data exceeds 70% of the memory budget
    pub fn exceed_memory_threshold(&self) -> bool {
        self.approximate_memory() * 10 > self.memory_budget * 7
    }

    fn approximate_memory(&self) -> usize {
        let pages: usize = self
            .pending_pages
            .iter()
            .map(|(summary, terms)| {
                summary.url.len()
                    + summary.title.len()
                    + summary.description.len()
                    + terms.iter().map(|(t, _)| t.len() + 8).sum::<usize>()
            })
            .sum();
        let to_crawl: usize = self.pending_to_crawl.iter().map(|d| d.url.len() + 8).sum();
        let links: usize = self.pending_links.iter().map(|(_, t, _)| t.len() + 24).sum();
        let robots: usize = self.pending_robots.iter().map(|r| r.body.len()).sum();
        pages + to_crawl + links + robots + self.pending_seen.len() * 8
    }

    /// Pseudo-random queue-server choice
    fn pick_queue_server(&mut self) -> String {
        let index = self.rng.gen_range(0..self.queue_servers.len());
        self.queue_servers[index].clone()
    }

    /// Polls the name server for the active crawl parameters
    async fn poll_crawl_time(&mut self) -> crate::Result<u64> {
        let time = Utc::now().timestamp() as u64;
        let session = session_token(time, &self.secret);
        let body = self
            .http
            .get(&self.name_server)
            .query(&[
                ("c", "fetch"),
                ("a", "crawlTime"),
                ("time", &time.to_string()),
                ("session", &session),
                ("machine_uri", &self.machine_id),
                ("crawl_time", &self.crawl_time.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let params: CrawlParameters = decode_payload(&body)?;
        if !params.queue_servers.is_empty() {
            self.queue_servers = params.queue_servers;
        }
        Ok(params.crawl_time)
    }

    /// Requests a fetch batch; None when the server has nothing for us
    async fn request_batch(&mut self, server: &str) -> crate::Result<Option<FetchBatch>> {
        let time = Utc::now().timestamp() as u64;
        let session = session_token(time, &self.secret);
        let response = self
            .http
            .get(server)
            .query(&[
                ("c", "fetch"),
                ("a", "schedule"),
                ("time", &time.to_string()),
                ("session", &session),
                ("machine_uri", &self.machine_id),
                ("crawl_time", &self.crawl_time.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let batch = FetchBatch::from_wire(&body)
            .map_err(|e| crate::NetweftError::Protocol(format!("bad batch: {}", e)))?;
        debug!(server, urls = batch.url_count(), "Received fetch batch");
        Ok(Some(batch))
    }

    /// Downloads and processes one batch
    async fn run_batch(&mut self, batch: FetchBatch) {
        let paced = batch.slots.iter().any(|s| {
            matches!(s, UrlSlot::Url { crawl_delay, .. } if *crawl_delay > 0)
        });

        let mut retry: Vec<(String, f32)> = Vec::new();
        let slots = batch.slots;
        for burst in slots.chunks(self.burst_size) {
            let targets: Vec<(String, f32)> = burst
                .iter()
                .filter_map(|slot| match slot {
                    UrlSlot::Url { url, weight, .. } => Some((url.clone(), *weight)),
                    UrlSlot::Dummy => None,
                })
                .collect();

            let results = self.download_burst(&targets).await;
            self.handle_results(results, Some(&mut retry));

            if paced {
                tokio::time::sleep(BURST_INTERVAL).await;
            }
        }

        // One more chance for URLs with no response at all
        if !retry.is_empty() {
            debug!(count = retry.len(), "Retrying unresponsive URLs");
            let results = self.download_burst(&retry).await;
            self.handle_results(results, None);
        }
    }

    /// Issues one burst of concurrent downloads
    async fn download_burst(&mut self, targets: &[(String, f32)]) -> Vec<DownloadResult> {
        let mut set: JoinSet<DownloadResult> = JoinSet::new();
        for (url, weight) in targets {
            let http = self.http.clone();
            let url = url.clone();
            let weight = *weight;
            let slow_host = host_of(&url)
                .map(|h| self.host_errors.get(&h).copied().unwrap_or(0) >= self.host_error_threshold)
                .unwrap_or(false);

            set.spawn(async move {
                if slow_host {
                    tokio::time::sleep(ERROR_HOST_DELAY).await;
                }
                let outcome = fetch_page(&http, &url).await;
                DownloadResult {
                    url,
                    weight,
                    outcome,
                }
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Download task panicked"),
            }
        }
        results
    }

    /// Folds download results into the pending upload state
    ///
    /// `retry` is Some on the first attempt: URLs with no response go
    /// there instead of being dropped. On the second attempt they count
    /// against the host's error score.
    fn handle_results(
        &mut self,
        results: Vec<DownloadResult>,
        mut retry: Option<&mut Vec<(String, f32)>>,
    ) {
        for result in results {
            let page = match result.outcome {
                Ok(page) => page,
                Err(reason) => {
                    match retry.as_deref_mut() {
                        Some(retry) => retry.push((result.url, result.weight)),
                        None => {
                            debug!(url = %result.url, %reason, "Dropped after retry");
                            self.count_host_error(&result.url);
                        }
                    }
                    continue;
                }
            };

            self.pending_seen.push(url_hash(&page.url));

            if is_robots_url(&page.url) {
                if let Some(host) = host_of(&page.url) {
                    self.pending_robots.push(RobotsUpload {
                        host,
                        status: page.status,
                        body: page.body,
                        ip_addresses: page.remote_addr.into_iter().collect(),
                    });
                }
                continue;
            }

            if !(200..300).contains(&page.status) {
                self.count_host_error(&page.url);
                continue;
            }

            if page.etag.is_some() || page.expires.is_some() {
                self.pending_revalidations.push(RevalidationUpload {
                    url: page.url.clone(),
                    etag: page.etag.clone(),
                    expires: page.expires.clone(),
                });
            }

            let Some(processed) = self.registry.process(&page) else {
                continue;
            };

            // Sitemaps contribute links only, nothing indexable
            let is_sitemap = doc_tag_for(&page.content_type) == Some("sitemap");
            if !is_sitemap {
                let summary = PageSummary {
                    doc_key: DocKey::for_document(&page.url, page.body.as_bytes()),
                    url: page.url.clone(),
                    title: processed.title,
                    description: processed.description,
                    word_count: processed.word_count,
                    crawl_time: self.crawl_time,
                };
                self.pending_pages.push((summary, processed.term_scores));
            }

            let scored = if is_sitemap {
                sitemap_link_weights(result.weight as f64, &processed.links)
            } else {
                score_links(
                    self.crawl_order,
                    &page.url,
                    result.weight as f64,
                    &processed.links,
                )
            };

            // Link postings resolve to the referring page's summary, so
            // sitemap links (which have none) stay out of the shard
            if !is_sitemap {
                let parent_company = host_of(&page.url).map(|h| company_domain(&h));
                for (url, weight) in &scored {
                    let internal = host_of(url).map(|h| company_domain(&h)) == parent_company;
                    self.pending_links.push((
                        DocKey::for_link(&page.url, url, internal),
                        url.clone(),
                        *weight as f32,
                    ));
                }
            }
            self.pending_to_crawl.extend(
                scored
                    .into_iter()
                    .map(|(url, weight)| DiscoveredUrl {
                        url,
                        weight: weight as f32,
                    }),
            );
        }
    }

    fn count_host_error(&mut self, url: &str) {
        if let Some(host) = host_of(url) {
            let count = self.host_errors.entry(host.clone()).or_insert(0);
            *count += 1;
            if *count == self.host_error_threshold {
                info!(host = %host, "Host over error threshold; enforcing delay");
            }
        }
    }

    /// Uploads everything pending, if anything is
    async fn upload_pending(&mut self) -> crate::Result<()> {
        let bundle = crate::transfer::UploadBundle {
            crawl_time: self.crawl_time,
            machine_id: self.machine_id.clone(),
            to_crawl: self.pending_to_crawl.clone(),
            seen_urls: self.pending_seen.clone(),
            robots: self.pending_robots.clone(),
            revalidations: self.pending_revalidations.clone(),
            summaries: self.pending_pages.iter().map(|(s, _)| s.clone()).collect(),
            shard: build_shard(&self.pending_pages, &self.pending_links),
        };
        let counts = self.byte_counts();
        if !bundle.is_empty() {
            debug!(
                docs = bundle.shard.doc_count(),
                terms = bundle.shard.term_count(),
                to_crawl = bundle.to_crawl.len(),
                "Uploading pending results"
            );
        }

        let server = self.pick_queue_server();
        match self.uploader.upload(&server, &bundle, &counts).await? {
            UpdateStatus::Stop => {
                info!("Server reported crawl stop during upload");
                self.stopped = true;
            }
            _ => self.clear_pending(),
        }
        Ok(())
    }

    fn byte_counts(&self) -> ByteCounts {
        let to_crawl: u64 = self
            .pending_to_crawl
            .iter()
            .map(|d| d.url.len() as u64 + 4)
            .sum();
        let seen = self.pending_seen.len() as u64 * 8;
        let index: u64 = self
            .pending_pages
            .iter()
            .map(|(summary, terms)| {
                (summary.url.len() + summary.title.len() + summary.description.len()) as u64
                    + terms.iter().map(|(t, _)| t.len() as u64 + 12).sum::<u64>()
            })
            .sum::<u64>()
            + self.pending_robots.iter().map(|r| r.body.len() as u64).sum::<u64>()
            + self
                .pending_links
                .iter()
                .map(|(_, t, _)| t.len() as u64 + 24)
                .sum::<u64>()
            + self
                .pending_revalidations
                .iter()
                .map(|r| r.url.len() as u64)
                .sum::<u64>();

        ByteCounts {
            total: to_crawl + seen + index,
            to_crawl,
            seen,
            index,
        }
    }

    fn clear_pending(&mut self) {
        self.pending_pages.clear();
        self.pending_links.clear();
        self.pending_to_crawl.clear();
        self.pending_seen.clear();
        self.pending_robots.clear();
        self.pending_revalidations.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

fn is_robots_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path() == "/robots.txt")
        .unwrap_or(false)
}

/// Downloads one page; errors become strings so results stay cloneable
async fn fetch_page(http: &reqwest::Client, url: &str) -> Result<DownloadedPage, String> {
    let response = http.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let etag = header_string(&response, reqwest::header::ETAG);
    let expires = header_string(&response, reqwest::header::EXPIRES);
    let remote_addr = response.remote_addr().map(|a| a.ip().to_string());
    let body = response.text().await.map_err(|e| e.to_string())?;

    Ok(DownloadedPage {
        url: url.to_string(),
        status,
        content_type,
        etag,
        expires,
        remote_addr,
        body,
    })
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
