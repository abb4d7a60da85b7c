use crate::config::types::{Config, CrawlConfig, NetworkConfig, SiteRulesConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_network_config(&config.network)?;
    validate_site_rules(&config.sites)?;
    Ok(())
}

/// Validates crawl configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_fetch_size < 1 || config.max_fetch_size > 10_000 {
        return Err(ConfigError::Validation(format!(
            "max_fetch_size must be between 1 and 10000, got {}",
            config.max_fetch_size
        )));
    }

    if config.num_multi_fetch_pages < 1 || config.num_multi_fetch_pages > config.max_fetch_size {
        return Err(ConfigError::Validation(format!(
            "num_multi_fetch_pages must be between 1 and max_fetch_size, got {}",
            config.num_multi_fetch_pages
        )));
    }

    if config.docs_per_generation < 1 {
        return Err(ConfigError::Validation(
            "docs_per_generation must be >= 1".to_string(),
        ));
    }

    if config.max_queue_size < config.max_fetch_size {
        return Err(ConfigError::Validation(format!(
            "max_queue_size ({}) must be >= max_fetch_size ({})",
            config.max_queue_size, config.max_fetch_size
        )));
    }

    if config.robots_ttl_hours < 1 {
        return Err(ConfigError::Validation(
            "robots_ttl_hours must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    if !config.contact_email.contains('@') {
        return Err(ConfigError::Validation(format!(
            "contact_email does not look like an email address: '{}'",
            config.contact_email
        )));
    }

    Ok(())
}

/// Validates network configuration
fn validate_network_config(config: &NetworkConfig) -> Result<(), ConfigError> {
    if config.queue_servers.is_empty() {
        return Err(ConfigError::Validation(
            "at least one queue-server URL is required".to_string(),
        ));
    }

    for server in &config.queue_servers {
        Url::parse(server)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid queue-server URL: {}", e)))?;
    }

    Url::parse(&config.name_server)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid name-server URL: {}", e)))?;

    if config.shared_secret.len() < 8 {
        return Err(ConfigError::Validation(
            "shared_secret must be at least 8 characters".to_string(),
        ));
    }

    // Chunked transfer needs headroom below the POST ceiling
    if config.post_max_size < 64 * 1024 {
        return Err(ConfigError::Validation(format!(
            "post_max_size must be >= 65536, got {}",
            config.post_max_size
        )));
    }

    Ok(())
}

/// Validates site allow/disallow/quota patterns
fn validate_site_rules(config: &SiteRulesConfig) -> Result<(), ConfigError> {
    for entry in config.allowed.iter().chain(config.disallowed.iter()) {
        // Quota suffix only makes sense on disallow entries, but a stray
        // one on an allow entry is a config mistake either way
        let site = entry.split('#').next().unwrap_or("");
        if site.is_empty() {
            return Err(ConfigError::InvalidPattern(entry.clone()));
        }
        if let Some(quota) = entry.split_once('#').map(|(_, q)| q) {
            quota
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidPattern(entry.clone()))?;
        }
    }

    if config.allowed_doc_types.is_empty() {
        return Err(ConfigError::Validation(
            "allowed_doc_types cannot be empty".to_string(),
        ));
    }

    Ok(())
}
