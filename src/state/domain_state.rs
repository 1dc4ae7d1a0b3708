use crate::config::ThrottleConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks the throttle state of one origin during crawling
///
/// This structure holds the per-origin information the domain throttle needs
/// to decide whether a request may start: spacing since the last request,
/// concurrency, and any server-requested backoff (HTTP 429).
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Start time of the most recent request to this origin
    pub last_request_time: Option<Instant>,

    /// Requests currently in flight to this origin
    pub active_requests: u32,

    /// No request may start before this instant (set from Retry-After)
    pub backoff_until: Option<Instant>,

    /// Number of requests started to this origin in the current crawl
    pub request_count: u64,
}

impl DomainState {
    /// Creates a new DomainState with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request can start now
    ///
    /// This method enforces:
    /// - The concurrency cap for the origin
    /// - Minimum time between request starts to the origin
    /// - Any backoff window requested by the server
    pub fn can_request(&self, config: &ThrottleConfig, now: Instant) -> bool {
        self.active_requests < config.max_concurrent_per_domain
            && self.time_until_ready(config, now).is_none()
    }

    /// Time until spacing and backoff allow the next request
    ///
    /// Returns None if no time-based wait is needed. Concurrency is not a
    /// time-based wait; callers wait for a release instead.
    pub fn time_until_ready(&self, config: &ThrottleConfig, now: Instant) -> Option<Duration> {
        let mut ready_at = now;

        if let Some(last) = self.last_request_time {
            ready_at = ready_at.max(last + config.min_request_interval());
        }
        if let Some(until) = self.backoff_until {
            ready_at = ready_at.max(until);
        }

        if ready_at > now {
            Some(ready_at - now)
        } else {
            None
        }
    }

    /// Attempts to start a request, updating the state when allowed
    pub fn try_acquire(&mut self, config: &ThrottleConfig, now: Instant) -> bool {
        if !self.can_request(config, now) {
            return false;
        }
        self.active_requests += 1;
        self.request_count += 1;
        self.last_request_time = Some(now);
        true
    }

    /// Records that a request finished
    pub fn record_release(&mut self) {
        self.active_requests = self.active_requests.saturating_sub(1);
    }

    /// Pushes the backoff window out to `until`; never shortens it
    pub fn extend_backoff(&mut self, until: Instant) {
        self.backoff_until = Some(match self.backoff_until {
            Some(current) => current.max(until),
            None => until,
        });
    }

    /// Returns true if a server-requested backoff is still in effect
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.backoff_until.map_or(false, |until| until > now)
    }
}
