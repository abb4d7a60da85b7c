//! Site-level allow/disallow/quota rules
//!
//! Rules are computed from the config once and recomputed only when the
//! config hash changes; the scheduler then culls already-queued URLs that
//! became non-crawlable.

use crate::config::SiteRulesConfig;
use url::Url;

/// One parsed quota rule: `site#per-hour-limit`
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSite {
    pub site: String,
    pub per_hour: u32,
}

/// Compiled site rules
#[derive(Debug, Clone)]
pub struct SiteRules {
    allowed: Vec<String>,
    disallowed: Vec<String>,
    quotas: Vec<QuotaSite>,
    allowed_doc_types: Vec<String>,
    config_hash: String,
}

impl SiteRules {
    /// Compiles rules from the config
    ///
    /// Disallow entries of the form `site#N` become quota rules instead of
    /// hard disallows: the site stays crawlable, capped at N downloads per
    /// wall-clock hour.
    pub fn from_config(config: &SiteRulesConfig, config_hash: &str) -> Self {
        let mut disallowed = Vec::new();
        let mut quotas = Vec::new();

        for entry in &config.disallowed {
            match entry.split_once('#') {
                Some((site, quota)) => match quota.parse::<u32>() {
                    Ok(per_hour) => quotas.push(QuotaSite {
                        site: site.to_string(),
                        per_hour,
                    }),
                    Err(_) => {
                        // Validation rejects non-numeric quotas upstream
                        disallowed.push(site.to_string());
                    }
                },
                None => disallowed.push(entry.clone()),
            }
        }

        Self {
            allowed: config.allowed.clone(),
            disallowed,
            quotas,
            allowed_doc_types: config.allowed_doc_types.clone(),
            config_hash: config_hash.to_string(),
        }
    }

    /// True when `new_hash` differs from the hash these rules were built from
    pub fn needs_recompute(&self, new_hash: &str) -> bool {
        self.config_hash != new_hash
    }

    pub fn quotas(&self) -> &[QuotaSite] {
        &self.quotas
    }

    /// Matches a URL against the hard disallow patterns
    pub fn is_disallowed(&self, url: &str) -> bool {
        self.disallowed.iter().any(|p| pattern_matches(p, url))
    }

    /// Matches a URL against the explicit allow patterns
    pub fn is_explicitly_allowed(&self, url: &str) -> bool {
        self.allowed.iter().any(|p| pattern_matches(p, url))
    }

    /// Checks the URL's extension against the doc-type allow-list
    ///
    /// Extensionless paths are assumed to be HTML.
    pub fn doc_type_allowed(&self, url: &str) -> bool {
        let tag = doc_type_tag(url);
        self.allowed_doc_types.iter().any(|t| t == &tag)
    }
}

/// Matches a site pattern against a URL
///
/// A pattern containing `/` is a URL prefix match; otherwise it matches the
/// host exactly or as a parent domain (`example.com` matches
/// `sub.example.com`).
pub fn pattern_matches(pattern: &str, url: &str) -> bool {
    if pattern.contains('/') {
        let stripped = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let pattern = pattern
            .strip_prefix("https://")
            .or_else(|| pattern.strip_prefix("http://"))
            .unwrap_or(pattern);
        return stripped.starts_with(pattern);
    }

    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) else {
        return false;
    };
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

/// Maps a URL to its doc-type tag from the path extension
fn doc_type_tag(url: &str) -> String {
    let path = Url::parse(url)
        .ok()
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => match ext.to_lowercase().as_str() {
            "html" | "htm" | "php" | "asp" | "aspx" => "html".to_string(),
            "txt" => "text".to_string(),
            "xml" => "sitemap".to_string(),
            other => other.to_string(),
        },
        _ => "html".to_string(),
    }
}
