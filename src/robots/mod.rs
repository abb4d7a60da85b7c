//! Robots policy: robots.txt records, site rules, and hourly quotas
//!
//! Robots.txt URLs are scheduled and downloaded like any other page; the
//! fetchers ship the response back and the queue-server ingests it here.
//! The resulting [`RobotsRecord`]s gate batch production: no normal URL
//! for a host is admitted until that host's robots state is known.
//!
//! Failure semantics are fail-closed: any robots.txt fetch error other
//! than a plain 404 disallows the whole host until the record's TTL
//! forces a re-fetch. A 404 means the site has no policy, so everything
//! is allowed.

mod cache;
mod parser;
mod quota;
mod rules;

pub use cache::{RobotsCache, RobotsRecord};
pub use parser::ParsedRobots;
pub use quota::QuotaTracker;
pub use rules::SiteRules;

use url::Url;

/// Outcome of downloading a host's robots.txt, as reported by a fetcher
#[derive(Debug, Clone)]
pub struct RobotsResponse {
    pub host: String,
    pub status: u16,
    pub body: String,
    pub ip_addresses: Vec<String>,
}

/// Central policy object consulted by the scheduler before admitting URLs
pub struct RobotsPolicy {
    rules: SiteRules,
    cache: RobotsCache,
    quota: QuotaTracker,
    restrict_by_url: bool,
    user_agent: String,
}

impl RobotsPolicy {
    pub fn new(rules: SiteRules, ttl_hours: i64, restrict_by_url: bool, user_agent: String) -> Self {
        let quota = QuotaTracker::from_rules(&rules);
        Self {
            rules,
            cache: RobotsCache::new(ttl_hours),
            quota,
            restrict_by_url,
            user_agent,
        }
    }

    /// Ingests a fetcher-reported robots.txt download
    ///
    /// * 2xx: parse the body into a record.
    /// * 404: no policy; allow-all record.
    /// * anything else: ambiguous failure; deny-all record (fail-closed).
    pub fn ingest_robots(&mut self, response: RobotsResponse) {
        let parsed = match response.status {
            200..=299 => {
                let parsed = ParsedRobots::from_content(&response.body);
                tracing::debug!(
                    host = %response.host,
                    disallows = parsed.disallowed_paths().len(),
                    "Parsed robots.txt"
                );
                parsed
            }
            404 => ParsedRobots::allow_all(),
            status => {
                tracing::debug!(host = %response.host, status, "Robots fetch failed, failing closed");
                ParsedRobots::deny_all()
            }
        };

        let crawl_delay = parsed.crawl_delay(&self.user_agent).unwrap_or(0.0);
        self.cache.insert(RobotsRecord::new(
            response.host,
            parsed,
            crawl_delay as u32,
            response.ip_addresses,
        ));
    }

    /// Returns true if the host has a live (non-stale) robots record
    pub fn has_record(&self, host: &str) -> bool {
        self.cache.get(host).is_some()
    }

    /// Checks whether a URL may be crawled at all
    ///
    /// Order: doc-type allow-list, explicit disallow patterns, explicit
    /// allow patterns (when restrict-by-url is on), then the host's robots
    /// disallow paths. An unknown host is allowed here; the scheduler
    /// separately defers URLs whose robots state is pending.
    pub fn is_allowed(&self, url: &str) -> bool {
        if !self.rules.doc_type_allowed(url) {
            return false;
        }
        if self.rules.is_disallowed(url) {
            return false;
        }
        if self.restrict_by_url && !self.rules.is_explicitly_allowed(url) {
            return false;
        }

        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };

        match self.cache.get(host) {
            Some(record) => record.is_allowed(parsed.path(), &self.user_agent),
            None => true,
        }
    }

    /// Crawl-delay in seconds for a host; 0 if unknown or none
    pub fn crawl_delay(&self, host: &str) -> u32 {
        self.cache
            .get(host)
            .map(|record| record.crawl_delay)
            .unwrap_or(0)
    }

    /// Checks the hourly download quota for a URL's site
    ///
    /// Exceeding quota defers the URL rather than dropping it; callers
    /// leave the URL queued for a later batch. Checked before crawl-delay
    /// (source precedence preserved).
    pub fn within_quota(&mut self, url: &str) -> bool {
        self.quota.within_quota(url, chrono::Utc::now())
    }

    /// Records a completed download against the URL's quota, if any
    pub fn record_download(&mut self, url: &str) {
        self.quota.record_download(url, chrono::Utc::now());
    }

    /// Drops expired robots records, returning the affected hosts
    ///
    /// The scheduler forgets these hosts in the robots-known filter so
    /// their robots.txt is re-fetched on next contact.
    pub fn evict_stale_robots(&mut self) -> Vec<String> {
        self.cache.evict_stale()
    }

    /// Replaces the site rules after a config change and rebuilds quotas
    ///
    /// The caller (scheduler) is responsible for culling queued URLs that
    /// became non-crawlable under the new rules.
    pub fn recompute_rules(&mut self, rules: SiteRules) {
        self.quota = QuotaTracker::from_rules(&rules);
        self.rules = rules;
    }

    /// True when the rules were built from a different config hash
    pub fn rules_need_recompute(&self, config_hash: &str) -> bool {
        self.rules.needs_recompute(config_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteRulesConfig;

    fn policy() -> RobotsPolicy {
        let rules = SiteRules::from_config(&SiteRulesConfig::default(), "hash0");
        RobotsPolicy::new(rules, 24, false, "TestWeft/1.0".to_string())
    }

    #[test]
    fn test_robots_fail_closed_on_500() {
        let mut policy = policy();
        policy.ingest_robots(RobotsResponse {
            host: "flaky.example".to_string(),
            status: 500,
            body: String::new(),
            ip_addresses: vec![],
        });

        assert!(!policy.is_allowed("https://flaky.example/any/path"));
        assert!(!policy.is_allowed("https://flaky.example/"));
    }

    #[test]
    fn test_robots_404_allows_all() {
        let mut policy = policy();
        policy.ingest_robots(RobotsResponse {
            host: "open.example".to_string(),
            status: 404,
            body: String::new(),
            ip_addresses: vec![],
        });

        assert!(policy.is_allowed("https://open.example/anything"));
    }

    #[test]
    fn test_robots_disallow_path_enforced() {
        let mut policy = policy();
        policy.ingest_robots(RobotsResponse {
            host: "strict.example".to_string(),
            status: 200,
            body: "User-agent: *\nDisallow: /admin".to_string(),
            ip_addresses: vec![],
        });

        assert!(policy.is_allowed("https://strict.example/public"));
        assert!(!policy.is_allowed("https://strict.example/admin/users"));
    }

    #[test]
    fn test_crawl_delay_from_record() {
        let mut policy = policy();
        policy.ingest_robots(RobotsResponse {
            host: "slow.example".to_string(),
            status: 200,
            body: "User-agent: *\nCrawl-delay: 30".to_string(),
            ip_addresses: vec![],
        });

        assert_eq!(policy.crawl_delay("slow.example"), 30);
        assert_eq!(policy.crawl_delay("unknown.example"), 0);
    }

    #[test]
    fn test_restrict_by_url_requires_allow_match() {
        let config = SiteRulesConfig {
            allowed: vec!["good.example".to_string()],
            disallowed: vec![],
            allowed_doc_types: vec!["html".to_string()],
        };
        let rules = SiteRules::from_config(&config, "hash1");
        let policy = RobotsPolicy::new(rules, 24, true, "TestWeft/1.0".to_string());

        assert!(policy.is_allowed("https://good.example/page"));
        assert!(!policy.is_allowed("https://other.example/page"));
    }
}
