use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is persisted with crawl state; a change between runs triggers
/// recomputation of the site quota/allow/disallow rules and a cull of
/// already-queued URLs that became non-crawlable.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_CONFIG: &str = r#"
[crawl]
crawl-order = "page-importance"
max-fetch-size = 100

[user-agent]
crawler-name = "TestWeft"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[network]
queue-servers = ["http://127.0.0.1:8123"]
name-server = "http://127.0.0.1:8123"
shared-secret = "s3cret"

[paths]
work-dir = "./crawl"
database-path = "./crawl/netweft.db"

[sites]
disallowed = ["spam.example#100"]
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawl.max_fetch_size, 100);
        assert_eq!(config.user_agent.crawler_name, "TestWeft");
        assert_eq!(config.network.queue_servers.len(), 1);
        assert_eq!(config.sites.disallowed, vec!["spam.example#100"]);
        // Defaults filled in
        assert_eq!(config.crawl.num_multi_fetch_pages, 10);
        assert_eq!(config.network.post_max_size, 2_000_000);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/netweft.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is not toml {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_hash_changes_with_content() {
        let file_a = create_temp_config(VALID_CONFIG);
        let file_b = create_temp_config(&VALID_CONFIG.replace("100", "200"));

        let hash_a = compute_config_hash(file_a.path()).unwrap();
        let hash_b = compute_config_hash(file_b.path()).unwrap();
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn test_config_hash_stable() {
        let file = create_temp_config(VALID_CONFIG);
        let h1 = compute_config_hash(file.path()).unwrap();
        let h2 = compute_config_hash(file.path()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_user_agent_string_format() {
        let file = create_temp_config(VALID_CONFIG);
        let (config, _) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(
            config.user_agent.user_agent_string(),
            "TestWeft/1.0 (+https://example.com/about; admin@example.com)"
        );
    }
}
