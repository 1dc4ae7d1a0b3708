use crate::url::ResourceKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for Site-Atlas
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// URL the crawl starts from (depth 0)
    #[serde(default)]
    pub seed_url: String,

    /// Maximum page depth to crawl from the seed
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Safety ceiling on the number of items dispatched for fetching
    #[serde(default = "default_max_total_items")]
    pub max_total_items: usize,

    /// Whether pages and assets on other origins are fetched
    #[serde(default)]
    pub follow_external_links: bool,

    /// Asset kinds that are downloaded when referenced
    #[serde(default = "default_allowed_asset_kinds")]
    pub allowed_asset_kinds: Vec<ResourceKind>,

    /// Number of parallel crawl workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum redirect hops followed for a single request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Time in-flight work may take to finish after cancellation (seconds)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on a single backoff (milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Per-origin throttle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottleConfig {
    /// Maximum requests in flight to one origin
    #[serde(default = "default_max_concurrent_per_domain")]
    pub max_concurrent_per_domain: u32,

    /// Minimum time between request starts to the same origin (milliseconds)
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    #[serde(default = "default_crawler_name")]
    pub crawler_name: String,

    #[serde(default = "default_crawler_version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(default)]
    pub contact_url: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory the mirrored site is written to
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// File name of the JSON site map (relative to `directory`)
    #[serde(default = "default_map_file")]
    pub map_file: String,

    /// File name of the human-readable structure listing
    #[serde(default = "default_structure_file")]
    pub structure_file: String,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Returns true if assets of this kind should be downloaded
    pub fn allows_asset(&self, kind: ResourceKind) -> bool {
        self.allowed_asset_kinds.contains(&kind)
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl ThrottleConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `Name/Version` or `Name/Version (+ContactURL)`
    pub fn header_value(&self) -> String {
        if self.contact_url.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, self.contact_url
            )
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            max_depth: default_max_depth(),
            max_total_items: default_max_total_items(),
            follow_external_links: false,
            allowed_asset_kinds: default_allowed_asset_kinds(),
            max_workers: default_max_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_domain: default_max_concurrent_per_domain(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: default_crawler_name(),
            crawler_version: default_crawler_version(),
            contact_url: String::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            map_file: default_map_file(),
            structure_file: default_structure_file(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_total_items() -> usize {
    10_000
}

fn default_allowed_asset_kinds() -> Vec<ResourceKind> {
    vec![
        ResourceKind::Css,
        ResourceKind::Js,
        ResourceKind::Image,
        ResourceKind::Font,
        ResourceKind::Other,
    ]
}

fn default_max_workers() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_redirects() -> u32 {
    10
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_max_concurrent_per_domain() -> u32 {
    3
}

fn default_min_request_interval_ms() -> u64 {
    100
}

fn default_crawler_name() -> String {
    "site-atlas".to_string()
}

fn default_crawler_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_output_directory() -> String {
    "./site-atlas-output".to_string()
}

fn default_map_file() -> String {
    "website_map.json".to_string()
}

fn default_structure_file() -> String {
    "website_structure.txt".to_string()
}
