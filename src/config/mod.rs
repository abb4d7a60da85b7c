//! Configuration module for netweft
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files for both the queue-server and fetcher roles.
//!
//! # Example
//!
//! ```no_run
//! use netweft::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("netweft.toml")).unwrap();
//! println!("Batch size: {}", config.crawl.max_fetch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, CrawlOrder, NetworkConfig, PathsConfig, SiteRulesConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
