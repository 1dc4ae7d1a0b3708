/// Item lifecycle states for the crawl orchestrator
///
/// Every crawl item moves forward through these states exactly once.
use crate::AtlasError;
use std::fmt;

/// Represents the current state of a crawl item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    /// Item is in the frontier, not yet popped
    Queued,

    /// Item was popped by a worker and is waiting for a throttle permit
    Dispatched,

    /// Fetcher is active, including its internal retries
    Fetching,

    // ===== Fetch Outcomes =====
    /// Fetch produced content, recorded into the site map
    Succeeded,

    /// Fetch ended in a terminal error, recorded into the site map
    Failed,

    /// Child links were discovered and enqueued (pages and stylesheets)
    Extracted,

    // ===== Terminal State =====
    Done,
}

impl ItemState {
    /// Returns true if the item needs no further processing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true while the item is still held by the frontier or a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Dispatched | Self::Fetching)
    }

    /// Returns true if `next` is a legal successor of this state
    ///
    /// `Succeeded -> Done` covers assets that have nothing to extract;
    /// a failed item is never extracted.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Queued, Dispatched)
                | (Dispatched, Fetching)
                | (Fetching, Succeeded)
                | (Fetching, Failed)
                | (Succeeded, Extracted)
                | (Succeeded, Done)
                | (Failed, Done)
                | (Extracted, Done)
        )
    }

    /// Moves to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: ItemState) -> Result<(), AtlasError> {
        if !self.can_transition_to(next) {
            return Err(AtlasError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::trace!("Item state {} -> {}", self, next);
        *self = next;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Fetching => "fetching",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Extracted => "extracted",
            Self::Done => "done",
        }
    }
}

impl Default for ItemState {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
