//! Configuration module for Site-Atlas
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every value except the seed URL has a default, so the smallest useful
//! configuration is:
//!
//! ```toml
//! [crawler]
//! seed-url = "https://example.com/"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use site_atlas::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, OutputConfig, RetryConfig, ThrottleConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, read_config,
};
pub use validation::validate;
