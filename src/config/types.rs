use serde::Deserialize;

/// Main configuration structure for netweft
///
/// One TOML file configures both roles; fetchers ignore the server-only
/// knobs and vice versa, so a deployment can ship a single file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub network: NetworkConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub sites: SiteRulesConfig,
}

/// Order in which the frontier hands out URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlOrder {
    /// Max-heap on page weight; high-importance pages first
    PageImportance,
    /// FIFO-like; ties preserved in insertion order
    BreadthFirst,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Dequeue order for the frontier
    #[serde(rename = "crawl-order", default = "default_crawl_order")]
    pub crawl_order: CrawlOrder,

    /// Maximum number of slots in one fetch batch
    #[serde(rename = "max-fetch-size", default = "default_max_fetch_size")]
    pub max_fetch_size: usize,

    /// Slot burst size; a crawl-delayed host's next slot lands at least one
    /// burst later so the delay elapses between its requests
    #[serde(rename = "num-multi-fetch-pages", default = "default_multi_fetch")]
    pub num_multi_fetch_pages: usize,

    /// Cap on hosts tracked as "waiting out a crawl-delay"
    #[serde(rename = "max-waiting-hosts", default = "default_max_waiting_hosts")]
    pub max_waiting_hosts: usize,

    /// Documents per durable index generation
    #[serde(rename = "docs-per-generation", default = "default_docs_per_generation")]
    pub docs_per_generation: u64,

    /// Minimum seconds per fetcher loop iteration
    #[serde(rename = "min-loop-time", default = "default_min_loop_time")]
    pub min_loop_time: u64,

    /// Fetcher memory budget in bytes; exceeding 70% forces upload-and-flush
    #[serde(rename = "memory-budget", default = "default_memory_budget")]
    pub memory_budget: usize,

    /// Pages accumulated before a fetcher uploads under normal operation
    #[serde(rename = "pages-per-upload", default = "default_pages_per_upload")]
    pub pages_per_upload: usize,

    /// In-RAM frontier capacity; beyond this, adds overflow to schedule files
    #[serde(rename = "max-queue-size", default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Hours before a cached robots.txt is forcibly re-fetched
    #[serde(rename = "robots-ttl-hours", default = "default_robots_ttl")]
    pub robots_ttl_hours: i64,

    /// Only admit URLs matching the allowed-site patterns
    #[serde(rename = "restrict-by-url", default)]
    pub restrict_by_url: bool,

    /// Seconds between periodic dictionary tier merges
    #[serde(rename = "tier-merge-interval", default = "default_tier_merge_interval")]
    pub tier_merge_interval: u64,

    /// Host error count after which an enforced crawl-delay kicks in
    #[serde(rename = "host-error-threshold", default = "default_host_error_threshold")]
    pub host_error_threshold: u32,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the full user-agent string: `name/version (+url; email)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Queue-server / fetcher network configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Queue-server base URLs; fetchers rotate among these pseudo-randomly
    #[serde(rename = "queue-servers")]
    pub queue_servers: Vec<String>,

    /// Name-server base URL fetchers poll for crawl switch/stop
    #[serde(rename = "name-server")]
    pub name_server: String,

    /// Shared secret for session tokens: `session = sha256(time + secret)`
    #[serde(rename = "shared-secret")]
    pub shared_secret: String,

    /// Assumed server POST size ceiling, in bytes, before the server
    /// advertises its real one
    #[serde(rename = "post-max-size", default = "default_post_max_size")]
    pub post_max_size: usize,

    /// Seconds slept between upload retries
    #[serde(rename = "retry-sleep", default = "default_retry_sleep")]
    pub retry_sleep: u64,

    /// Bind address for the queue-server role
    #[serde(rename = "bind-address", default = "default_bind_address")]
    pub bind_address: String,
}

/// Filesystem layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Working directory; `schedules/` and `cache/` live under it
    #[serde(rename = "work-dir")]
    pub work_dir: String,

    /// Path to the SQLite database holding the persistent hash filters
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Site-level allow / disallow / quota rules
///
/// Disallow entries may carry an hourly quota suffix: `spam.example#100`
/// means at most 100 downloads from that site per wall-clock hour.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteRulesConfig {
    #[serde(default)]
    pub allowed: Vec<String>,

    #[serde(default)]
    pub disallowed: Vec<String>,

    /// Doc-type tags the crawler will process (e.g. "html", "text",
    /// "sitemap")
    #[serde(rename = "allowed-doc-types", default = "default_doc_types")]
    pub allowed_doc_types: Vec<String>,
}

impl Default for SiteRulesConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            disallowed: Vec::new(),
            allowed_doc_types: default_doc_types(),
        }
    }
}

fn default_crawl_order() -> CrawlOrder {
    CrawlOrder::PageImportance
}

fn default_max_fetch_size() -> usize {
    200
}

fn default_multi_fetch() -> usize {
    10
}

fn default_max_waiting_hosts() -> usize {
    250
}

fn default_docs_per_generation() -> u64 {
    50_000
}

fn default_min_loop_time() -> u64 {
    5
}

fn default_memory_budget() -> usize {
    800_000_000
}

fn default_pages_per_upload() -> usize {
    250
}

fn default_max_queue_size() -> usize {
    100_000
}

fn default_robots_ttl() -> i64 {
    24
}

fn default_tier_merge_interval() -> u64 {
    3600
}

fn default_host_error_threshold() -> u32 {
    5
}

fn default_post_max_size() -> usize {
    2_000_000
}

fn default_retry_sleep() -> u64 {
    5
}

fn default_bind_address() -> String {
    "127.0.0.1:8123".to_string()
}

fn default_doc_types() -> Vec<String> {
    vec![
        "html".to_string(),
        "text".to_string(),
        "sitemap".to_string(),
    ]
}
