//! Crawl frontier and visited set
//!
//! The frontier holds pending work items, deduplicated against the set of
//! every URL ever enqueued. It also tracks in-flight work so that workers
//! know when the crawl is finished: the queue is empty and nothing that could
//! discover new URLs is still running.
//!
//! The visited set remembers the shallowest depth each URL was reached at.
//! A queued URL found again at a smaller depth moves up the queue; the old
//! heap entry goes stale and is skipped when it surfaces.

use crate::url::{url_key, ResourceKind};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use url::Url;

/// A unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlItem {
    /// Normalized URL to fetch
    pub url: Url,

    /// Page depth; assets carry the depth of the page that referenced them
    pub depth: u32,

    /// Classification at discovery time
    pub kind: ResourceKind,

    /// Page (or stylesheet) that referenced this item; None for the seed
    pub discovered_from: Option<Url>,
}

impl CrawlItem {
    /// Creates the seed item (depth 0, no referrer)
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            kind: ResourceKind::Page,
            discovered_from: None,
        }
    }

    pub fn key(&self) -> String {
        url_key(&self.url)
    }
}

/// Why the frontier stopped handing out work before running dry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The configured maximum number of dispatched items was reached
    CeilingReached,
    /// The crawl was cancelled
    Cancelled,
}

/// What [`Frontier::push`] did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// First time this URL was seen; it is now queued
    New,
    /// The URL was known at a greater depth; its depth was lowered
    Shallower {
        /// Depth the URL was known at before
        previous: u32,
    },
    /// The URL was already known at this depth or shallower
    Known,
}

impl PushOutcome {
    pub fn is_new(self) -> bool {
        self == Self::New
    }
}

/// Frontier entry with ordering information
///
/// Shallower items are popped first; equal depths pop in discovery order.
#[derive(Debug)]
struct QueuedItem {
    item: CrawlItem,
    seq: u64,
}

// BinaryHeap is a max-heap, so the comparison is reversed
impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .item
            .depth
            .cmp(&self.item.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

#[derive(Debug)]
struct FrontierInner {
    queue: BinaryHeap<QueuedItem>,
    /// Shallowest known depth of every URL ever enqueued
    visited: HashMap<String, u32>,
    /// Depth of the live heap entry of each URL still waiting
    queued: HashMap<String, u32>,
    in_flight: usize,
    dispatched: usize,
    max_items: usize,
    closed: Option<CloseReason>,
    next_seq: u64,
}

/// Shared work queue consumed by the crawl workers
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    changed: Notify,
}

impl FrontierInner {
    fn enqueue(&mut self, item: CrawlItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queued.insert(item.key(), item.depth);
        self.queue.push(QueuedItem { item, seq });
    }

    /// Pops the next live entry, discarding stale ones
    fn next_live(&mut self) -> Option<CrawlItem> {
        while let Some(queued) = self.queue.pop() {
            let key = queued.item.key();
            if self.queued.get(&key) == Some(&queued.item.depth) {
                self.queued.remove(&key);
                return Some(queued.item);
            }
        }
        None
    }
}

impl Frontier {
    /// Creates an empty frontier that dispatches at most `max_items` items
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(FrontierInner {
                queue: BinaryHeap::new(),
                visited: HashMap::new(),
                queued: HashMap::new(),
                in_flight: 0,
                dispatched: 0,
                max_items,
                closed: None,
                next_seq: 0,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues an item unless its URL was seen before
    ///
    /// Check and insert happen under one lock, so two workers discovering the
    /// same URL concurrently enqueue it once. A known URL reached at a smaller
    /// depth has its depth lowered, and if it is still waiting it is requeued
    /// at the new depth. Items pushed after the frontier closed stay queued
    /// and come back out of [`drain`](Self::drain).
    pub fn push(&self, item: CrawlItem) -> PushOutcome {
        let key = item.key();
        let mut inner = self.lock();

        let outcome = match inner.visited.get(&key).copied() {
            None => PushOutcome::New,
            Some(previous) if item.depth < previous => PushOutcome::Shallower { previous },
            Some(_) => return PushOutcome::Known,
        };

        inner.visited.insert(key.clone(), item.depth);
        let waiting = inner.queued.contains_key(&key);
        if outcome.is_new() || waiting {
            inner.enqueue(item);
        }
        drop(inner);

        if outcome.is_new() {
            self.changed.notify_waiters();
        }
        outcome
    }

    /// Returns true if the URL was ever enqueued
    pub fn contains(&self, url: &Url) -> bool {
        self.lock().visited.contains_key(&url_key(url))
    }

    /// Shallowest depth the URL has been reached at
    pub fn depth_of(&self, url: &Url) -> Option<u32> {
        self.lock().visited.get(&url_key(url)).copied()
    }

    /// Waits for the next item
    ///
    /// Returns None once the crawl is over for this worker: the queue is
    /// empty with no work in flight, the frontier was closed, or the dispatch
    /// ceiling was hit (which closes the frontier).
    pub async fn pop(&self) -> Option<InFlight<'_>> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed.is_some() {
                    return None;
                }

                if !inner.queued.is_empty() && inner.dispatched >= inner.max_items {
                    tracing::info!(
                        "Item ceiling of {} reached, {} items left in frontier",
                        inner.max_items,
                        inner.queued.len()
                    );
                    inner.closed = Some(CloseReason::CeilingReached);
                    drop(inner);
                    self.changed.notify_waiters();
                    return None;
                }

                if let Some(item) = inner.next_live() {
                    inner.in_flight += 1;
                    inner.dispatched += 1;
                    return Some(InFlight {
                        item,
                        frontier: self,
                    });
                }

                if inner.in_flight == 0 {
                    drop(inner);
                    self.changed.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops handing out work; waiting workers return immediately
    pub fn close(&self, reason: CloseReason) {
        {
            let mut inner = self.lock();
            if inner.closed.is_none() {
                inner.closed = Some(reason);
            }
        }
        self.changed.notify_waiters();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().closed
    }

    /// Removes and returns every item still queued, in pop order
    pub fn drain(&self) -> Vec<CrawlItem> {
        let mut inner = self.lock();
        let mut items = Vec::with_capacity(inner.queued.len());
        while let Some(item) = inner.next_live() {
            items.push(item);
        }
        inner.queue.clear();
        items
    }

    /// Number of items waiting in the queue
    pub fn len(&self) -> usize {
        self.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queued.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Number of items handed out to workers so far
    pub fn dispatched(&self) -> usize {
        self.lock().dispatched
    }

    /// Number of distinct URLs ever enqueued
    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    fn complete(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }
}

/// An item handed out by [`Frontier::pop`]
///
/// The item counts as in flight until this guard is dropped. Workers keep it
/// alive until every child discovered from the item has been pushed, so the
/// frontier never looks finished while more work is about to arrive.
#[derive(Debug)]
pub struct InFlight<'a> {
    item: CrawlItem,
    frontier: &'a Frontier,
}

impl InFlight<'_> {
    pub fn item(&self) -> &CrawlItem {
        &self.item
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}
