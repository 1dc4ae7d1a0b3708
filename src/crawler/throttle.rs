//! Per-origin request throttle
//!
//! Every request start must hold a [`ThrottlePermit`] for its origin. A permit
//! is granted once the origin's minimum spacing has elapsed, any server backoff
//! has expired and the origin is below its concurrency cap. Dropping the
//! permit releases the slot, so a permit can never leak on error or
//! cancellation.
//!
//! The throttle map lock is held only to look up an origin's slot; the
//! admission decision itself locks that origin's state alone.

use crate::config::ThrottleConfig;
use crate::state::DomainState;
use crate::url::Origin;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DomainSlot {
    state: Mutex<DomainState>,
    released: Notify,
}

impl DomainSlot {
    fn lock(&self) -> MutexGuard<'_, DomainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rate limiter shared by all workers
#[derive(Debug)]
pub struct DomainThrottle {
    config: ThrottleConfig,
    slots: Mutex<HashMap<Origin, Arc<DomainSlot>>>,
}

impl DomainThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, origin: &Origin) -> Arc<DomainSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(origin.clone()).or_default())
    }

    /// Waits until a request to `origin` may start
    ///
    /// Waiting is cancel-safe: dropping the future before it resolves leaves
    /// the origin's state untouched.
    pub async fn acquire(&self, origin: &Origin) -> ThrottlePermit {
        let slot = self.slot(origin);

        loop {
            let released = slot.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let wait = {
                let mut state = slot.lock();
                let now = Instant::now();
                if state.try_acquire(&self.config, now) {
                    tracing::trace!(
                        "Permit granted for {} ({} active)",
                        origin,
                        state.active_requests
                    );
                    return ThrottlePermit {
                        slot: Arc::clone(&slot),
                        origin: origin.clone(),
                    };
                }

                if state.active_requests >= self.config.max_concurrent_per_domain {
                    None
                } else {
                    state.time_until_ready(&self.config, now)
                }
            };

            match wait {
                Some(delay) => {
                    tracing::trace!("Waiting {:?} for {}", delay, origin);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::trace!("Waiting for a free slot on {}", origin);
                    released.await;
                }
            }
        }
    }

    /// Holds back every request to `origin` until `until`
    ///
    /// Used for server-requested backoff (HTTP 429 with Retry-After). An
    /// existing longer backoff is kept.
    pub fn defer(&self, origin: &Origin, until: Instant) {
        let slot = self.slot(origin);
        slot.lock().extend_backoff(until);
        tracing::debug!("Deferring requests to {}", origin);
    }

    /// Snapshot of an origin's state, if it was ever requested
    pub fn domain_state(&self, origin: &Origin) -> Option<DomainState> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(origin).map(|slot| slot.lock().clone())
    }

    /// Number of origins seen so far
    pub fn origin_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Proof that a request to an origin may run; released on drop
#[derive(Debug)]
pub struct ThrottlePermit {
    slot: Arc<DomainSlot>,
    origin: Origin,
}

impl ThrottlePermit {
    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.slot.lock().record_release();
        self.slot.released.notify_waiters();
    }
}
