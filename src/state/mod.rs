//! State module for tracking crawl progress
//!
//! This module provides state management for crawl items and origins during the crawl process.
//!
//! # Components
//!
//! - `ItemState`: Lifecycle of an individual crawl item (queued, dispatched, fetching, ...)
//! - `DomainState`: Per-origin state for spacing, concurrency and backoff

mod domain_state;
mod item_state;

// Re-export main types
pub use domain_state::DomainState;
pub use item_state::ItemState;
