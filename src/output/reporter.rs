//! Crawl event reporting
//!
//! The crawler emits structured events; how they are rendered is up to the
//! [`Reporter`] implementation passed in at construction.

use crate::crawler::FetchResult;
use crate::output::stats::CrawlSummary;
use std::time::Duration;
use url::Url;

/// Receives crawl progress events
///
/// All methods have empty default implementations, so a reporter only
/// overrides what it cares about. Implementations must be thread-safe.
pub trait Reporter: Send + Sync {
    /// An attempt to fetch `url` is starting (1-based)
    fn on_fetch_start(&self, _url: &Url, _attempt: u32) {}

    /// A fetch finished, successfully or not, retries included
    fn on_fetch_result(&self, _result: &FetchResult) {}

    /// Attempt `attempt` failed and another follows after `delay`
    fn on_retry(&self, _url: &Url, _attempt: u32, _delay: Duration) {}

    /// `url` was referenced for the first time, by `parent`
    fn on_discover(&self, _url: &Url, _parent: &Url) {}

    /// The crawl is over and its summary is final
    fn on_crawl_complete(&self, _summary: &CrawlSummary) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Renders events as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn on_fetch_start(&self, url: &Url, attempt: u32) {
        tracing::debug!(url = %url, attempt, "Fetching");
    }

    fn on_fetch_result(&self, result: &FetchResult) {
        match &result.error {
            None => tracing::debug!(
                url = %result.url,
                status = result.status,
                attempts = result.attempts,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Fetched"
            ),
            Some(error) => tracing::warn!(
                url = %result.url,
                status = result.status,
                attempts = result.attempts,
                "Fetch failed: {}",
                error
            ),
        }
    }

    fn on_retry(&self, url: &Url, attempt: u32, delay: Duration) {
        tracing::info!(
            url = %url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying"
        );
    }

    fn on_discover(&self, url: &Url, parent: &Url) {
        tracing::trace!(url = %url, parent = %parent, "Discovered");
    }

    fn on_crawl_complete(&self, summary: &CrawlSummary) {
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            retries = summary.retries,
            termination = %summary.termination,
            "Crawl complete"
        );
    }
}
