//! Crawler module for fetching and processing a site
//!
//! This module contains the core crawling logic, including:
//! - The frontier of pending work and the visited set
//! - Per-origin throttling and retry policy
//! - HTTP fetching with retries and manual redirects
//! - HTML and CSS link extraction
//! - Overall crawl coordination

mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod retry;
mod throttle;

pub use coordinator::{Coordinator, CrawlReport, ShutdownHandle};
pub use extractor::{extract, extract_css, extract_html, Extraction, LinkPolicy, SkippedLink};
pub use fetcher::{build_http_client, FetchError, FetchResult, Fetcher};
pub use frontier::{CloseReason, CrawlItem, Frontier, InFlight, PushOutcome};
pub use retry::{is_retryable_status, parse_retry_after, RetryPolicy};
pub use throttle::{DomainThrottle, ThrottlePermit};

use crate::config::Config;
use crate::output::{ContentSink, Reporter};
use std::sync::Arc;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Validate the configuration and normalize the seed
/// 2. Build the HTTP client
/// 3. Fetch pages and assets through the worker pool
/// 4. Extract and follow links within the configured bounds
/// 5. Write the site map files through the sink
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `sink` - Where fetched content and the map files are stored
/// * `reporter` - Receives progress events
///
/// # Returns
///
/// * `Ok(CrawlReport)` - The site map and summary, partial failures included
/// * `Err(AtlasError)` - Invalid configuration, or the map could not be written
pub async fn crawl(
    config: Config,
    sink: Arc<dyn ContentSink>,
    reporter: Arc<dyn Reporter>,
) -> crate::Result<CrawlReport> {
    Coordinator::new(config, sink, reporter)?.run().await
}
