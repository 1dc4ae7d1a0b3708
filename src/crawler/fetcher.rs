//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests with per-origin throttling for every attempt
//! - Retry with exponential backoff, jitter and Retry-After
//! - Manual redirect handling with loop detection
//! - Error classification

use crate::config::Config;
use crate::crawler::retry::{is_retryable_status, parse_retry_after, RetryPolicy};
use crate::crawler::throttle::{DomainThrottle, ThrottlePermit};
use crate::output::Reporter;
use crate::url::{normalize_url, url_key, Origin};
use reqwest::header::{CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

/// Why a fetch did not produce content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Http(u16),

    #[error("Redirect loop at {0}")]
    RedirectLoop(String),

    #[error("More than {0} redirects")]
    TooManyRedirects(u32),

    #[error("Invalid redirect location: {0}")]
    InvalidRedirect(String),

    #[error("Redirect leaves the crawled origin: {0}")]
    ExternalRedirect(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    /// Returns true if the retry policy applies to this error
    ///
    /// Transport errors, timeouts, 5xx and 429 are retried; other 4xx,
    /// redirect problems and cancellation are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http(status) => is_retryable_status(*status),
            _ => false,
        }
    }

    fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Transport(format!("Connection failed: {}", error))
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Outcome of fetching one URL, retries included
///
/// A fetch never fails across the fetcher boundary: transport problems and
/// error statuses are carried in `error`.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The URL that was requested
    pub url: Url,
    /// URL after redirects
    pub final_url: Url,
    /// Status of the last response, if any response arrived
    pub status: Option<u16>,
    /// None on success
    pub error: Option<FetchError>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Number of attempts made (1 + retries)
    pub attempts: u32,
    pub elapsed: Duration,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed by the fetcher itself so that every hop goes
/// through the throttle and loops can be detected.
///
/// # Example
///
/// ```no_run
/// use site_atlas::config::Config;
/// use site_atlas::crawler::build_http_client;
///
/// let client = build_http_client(&Config::default()).unwrap();
/// ```
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(config.crawler.request_timeout())
        .connect_timeout(Duration::from_secs(10).min(config.crawler.request_timeout()))
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Successful final response of one attempt
struct Delivered {
    final_url: Url,
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Failed attempt
struct Undelivered {
    final_url: Url,
    status: Option<u16>,
    error: FetchError,
    retry_after: Option<Duration>,
}

/// Performs GET requests with retry, throttling and redirect handling
pub struct Fetcher {
    client: Client,
    throttle: Arc<DomainThrottle>,
    policy: RetryPolicy,
    max_redirects: u32,
    /// Origin redirects must stay on; None follows them anywhere
    redirect_scope: Option<Origin>,
    reporter: Arc<dyn Reporter>,
    shutdown: watch::Receiver<bool>,
}

impl Fetcher {
    pub fn new(
        client: Client,
        throttle: Arc<DomainThrottle>,
        policy: RetryPolicy,
        max_redirects: u32,
        reporter: Arc<dyn Reporter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            throttle,
            policy,
            max_redirects,
            redirect_scope: None,
            reporter,
            shutdown,
        }
    }

    /// Treats redirects away from `origin` as terminal failures
    pub fn confine_redirects(mut self, origin: Origin) -> Self {
        self.redirect_scope = Some(origin);
        self
    }

    /// Fetches a URL, retrying per the retry policy
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Success |
    /// | HTTP 429 | Retry after max(Retry-After, backoff); origin deferred |
    /// | HTTP 5xx | Retry with backoff |
    /// | Timeout / transport error | Retry with backoff |
    /// | Other 4xx, 3xx without Location | Terminal |
    /// | Redirect loop / too many hops | Terminal |
    /// | Redirect off the confined origin | Terminal |
    ///
    /// Each attempt, and each redirect hop within it, holds a throttle permit
    /// while its request and body download run; backoff sleeps hold none.
    /// Cancellation interrupts backoff sleeps.
    pub async fn fetch(&self, url: &Url) -> FetchResult {
        let started = Instant::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            self.reporter.on_fetch_start(url, attempts);

            let failure = match self.attempt(url).await {
                Ok(delivered) => {
                    break FetchResult {
                        url: url.clone(),
                        final_url: delivered.final_url,
                        status: Some(delivered.status),
                        error: None,
                        content_type: delivered.content_type,
                        body: delivered.body,
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
                Err(failure) => failure,
            };

            let give_up = !failure.error.is_retryable()
                || !self.policy.should_retry(attempts)
                || self.is_cancelled();
            if give_up {
                break self.failed(url, failure, attempts, started);
            }

            let delay = self
                .policy
                .delay_with_retry_after(attempts - 1, failure.retry_after);

            if failure.status == Some(429) {
                if let (Some(origin), Some(server_delay)) =
                    (Origin::of(&failure.final_url), failure.retry_after)
                {
                    self.throttle.defer(&origin, Instant::now() + server_delay);
                }
            }

            tracing::debug!(
                "Attempt {} for {} failed ({}), retrying in {:?}",
                attempts,
                url,
                failure.error,
                delay
            );
            self.reporter.on_retry(url, attempts, delay);

            if !self.backoff(delay).await {
                let cancelled = Undelivered {
                    error: FetchError::Cancelled,
                    ..failure
                };
                break self.failed(url, cancelled, attempts, started);
            }
        };

        self.reporter.on_fetch_result(&result);
        result
    }

    fn failed(
        &self,
        url: &Url,
        failure: Undelivered,
        attempts: u32,
        started: Instant,
    ) -> FetchResult {
        FetchResult {
            url: url.clone(),
            final_url: failure.final_url,
            status: failure.status,
            error: Some(failure.error),
            content_type: None,
            body: Vec::new(),
            attempts,
            elapsed: started.elapsed(),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleeps for `delay`; returns false if cancelled meanwhile
    async fn backoff(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.wait_for(|cancelled| *cancelled) => false,
        }
    }

    /// One attempt: a GET plus any redirect hops
    async fn attempt(&self, url: &Url) -> Result<Delivered, Undelivered> {
        let mut current = url.clone();
        let mut seen = HashSet::new();
        seen.insert(url_key(&current));
        let mut hops = 0;

        loop {
            // Held until this hop's body is read
            let _permit = self.permit(&current).await?;
            let response = self.send(&current).await?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = header_str(&response, LOCATION) {
                    let next = next_hop(
                        &current,
                        &location,
                        hops,
                        self.max_redirects,
                        self.redirect_scope.as_ref(),
                        &mut seen,
                    )?;
                    tracing::trace!("Redirect {} -> {}", current, next);
                    current = next;
                    hops += 1;
                    continue;
                }
            }

            if !status.is_success() {
                let retry_after = header_str(&response, RETRY_AFTER)
                    .as_deref()
                    .and_then(parse_retry_after);
                return Err(Undelivered {
                    final_url: current,
                    status: Some(status.as_u16()),
                    error: FetchError::Http(status.as_u16()),
                    retry_after,
                });
            }

            let content_type = header_str(&response, CONTENT_TYPE);
            let body = response.bytes().await.map_err(|e| Undelivered {
                final_url: current.clone(),
                status: Some(status.as_u16()),
                error: FetchError::from_reqwest(&e),
                retry_after: None,
            })?;

            return Ok(Delivered {
                final_url: current,
                status: status.as_u16(),
                content_type,
                body: body.to_vec(),
            });
        }
    }

    /// Waits for the throttle to admit a request to `url`'s origin
    async fn permit(&self, url: &Url) -> Result<ThrottlePermit, Undelivered> {
        let origin = Origin::of(url).ok_or_else(|| Undelivered {
            final_url: url.clone(),
            status: None,
            error: FetchError::InvalidUrl(url.to_string()),
            retry_after: None,
        })?;
        Ok(self.throttle.acquire(&origin).await)
    }

    async fn send(&self, url: &Url) -> Result<Response, Undelivered> {
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Undelivered {
                final_url: url.clone(),
                status: None,
                error: FetchError::from_reqwest(&e),
                retry_after: None,
            })
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Resolves a redirect target, enforcing the hop limit, the origin scope and
/// loop detection
fn next_hop(
    current: &Url,
    location: &str,
    hops: u32,
    max_redirects: u32,
    scope: Option<&Origin>,
    seen: &mut HashSet<String>,
) -> Result<Url, Undelivered> {
    let fail = |error| Undelivered {
        final_url: current.clone(),
        status: None,
        error,
        retry_after: None,
    };

    if hops >= max_redirects {
        return Err(fail(FetchError::TooManyRedirects(max_redirects)));
    }

    let next = normalize_url(location, Some(current))
        .map_err(|e| fail(FetchError::InvalidRedirect(format!("{}: {}", location, e))))?;

    if scope.is_some_and(|origin| !origin.contains(&next)) {
        return Err(fail(FetchError::ExternalRedirect(next.to_string())));
    }

    if !seen.insert(url_key(&next)) {
        return Err(fail(FetchError::RedirectLoop(next.to_string())));
    }

    Ok(next)
}
