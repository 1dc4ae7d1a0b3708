//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl driver that coordinates all aspects of the
//! crawling process, including:
//! - Seeding the frontier and running the worker pool
//! - Moving each item through its lifecycle (fetch, store, record, extract)
//! - Termination on exhaustion, item ceiling or cancellation
//! - Flushing the site map and producing the summary

use crate::config::{validate, Config};
use crate::crawler::extractor::{extract, Extraction, LinkPolicy};
use crate::crawler::fetcher::{build_http_client, FetchError, FetchResult, Fetcher};
use crate::crawler::frontier::{CloseReason, CrawlItem, Frontier, InFlight, PushOutcome};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::throttle::DomainThrottle;
use crate::output::{write_site_map, ContentSink, CrawlSummary, Reporter, TerminationReason};
use crate::sitemap::{local_path_for, NodeOutcome, SiteMapBuilder, SiteMapExport, SkipReason};
use crate::state::ItemState;
use crate::url::{normalize_url, refine_kind, url_key, Origin, ResourceKind};
use crate::{Result, UrlError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use url::Url;

/// Items between two progress log lines
const PROGRESS_INTERVAL: u64 = 25;

/// Final product of a crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// The site map: tree plus flat manifest
    pub export: SiteMapExport,
    pub summary: CrawlSummary,
}

/// Requests cancellation of a running crawl
///
/// Cloneable so it can be handed to a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stops dispatching new work; in-flight items get the grace period
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    seed: Url,
    seed_origin: Origin,
    client: reqwest::Client,
    sink: Arc<dyn ContentSink>,
    reporter: Arc<dyn Reporter>,
    shutdown: ShutdownHandle,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// The configuration is validated here; an invalid configuration (for
    /// example a seed URL that does not normalize) is the only error that
    /// stops a crawl before it starts.
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `sink` - Where fetched content and the map files are stored
    /// * `reporter` - Receives progress events
    pub fn new(
        config: Config,
        sink: Arc<dyn ContentSink>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        validate(&config)?;

        let seed = normalize_url(&config.crawler.seed_url, None)?;
        let seed_origin = Origin::of(&seed).ok_or(UrlError::MissingHost)?;
        let client = build_http_client(&config)?;
        let (tx, _rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            seed,
            seed_origin,
            client,
            sink,
            reporter,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    pub fn seed(&self) -> &Url {
        &self.seed
    }

    /// Returns a handle that cancels this crawl
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs the crawl to completion
    ///
    /// Workers pull from the frontier until it runs dry, the item ceiling is
    /// reached or the crawl is cancelled. Per-item failures never end the
    /// crawl; they are recorded in the site map. The map files are written
    /// through the sink even when the crawl was cut short.
    pub async fn run(&self) -> Result<CrawlReport> {
        let started_at = Utc::now();
        let crawler = &self.config.crawler;
        tracing::info!(
            "Starting crawl of {} (max depth {}, {} workers)",
            self.seed,
            crawler.max_depth,
            crawler.max_workers
        );

        let throttle = Arc::new(DomainThrottle::new(self.config.throttle.clone()));
        let mut fetcher = Fetcher::new(
            self.client.clone(),
            throttle,
            RetryPolicy::new(&self.config.retry),
            crawler.max_redirects,
            Arc::clone(&self.reporter),
            self.shutdown.tx.subscribe(),
        );
        if !crawler.follow_external_links {
            fetcher = fetcher.confine_redirects(self.seed_origin.clone());
        }

        let ctx = Arc::new(CrawlContext {
            frontier: Frontier::new(crawler.max_total_items),
            builder: SiteMapBuilder::new(&self.seed),
            fetcher,
            policy: LinkPolicy::from_config(crawler, self.seed_origin.clone()),
            seed_origin: self.seed_origin.clone(),
            sink: Arc::clone(&self.sink),
            reporter: Arc::clone(&self.reporter),
            active: Mutex::new(HashMap::new()),
            expanded: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            started: Instant::now(),
        });

        ctx.frontier.push(CrawlItem::seed(self.seed.clone()));

        let mut workers = JoinSet::new();
        for id in 0..crawler.max_workers {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.work(id).await });
        }

        let mut cancelled = self.shutdown.tx.subscribe();
        let finished = tokio::select! {
            _ = join_workers(&mut workers) => true,
            _ = cancelled.wait_for(|cancelled| *cancelled) => false,
        };

        if !finished {
            tracing::warn!("Cancellation requested, no new items will be dispatched");
            ctx.frontier.close(CloseReason::Cancelled);

            let grace = crawler.grace_period();
            if tokio::time::timeout(grace, join_workers(&mut workers)).await.is_err() {
                tracing::warn!(
                    "Grace period of {:?} expired, interrupting {} workers",
                    grace,
                    workers.len()
                );
                workers.abort_all();
                join_workers(&mut workers).await;
            }
            ctx.record_interrupted();
        }

        let termination = match ctx.frontier.close_reason() {
            Some(CloseReason::Cancelled) => TerminationReason::Cancelled,
            Some(CloseReason::CeilingReached) => TerminationReason::CeilingReached,
            None => TerminationReason::Completed,
        };
        ctx.record_abandoned(termination);

        let export = ctx.builder.export();
        let mut summary = CrawlSummary::from_manifest(&export.seed, &export.manifest);
        summary.started_at = Some(started_at);
        summary.finished_at = Some(Utc::now());
        summary.termination = termination;
        summary.retries = ctx.retries.load(Ordering::Relaxed);
        summary.parse_warnings = ctx.warnings.load(Ordering::Relaxed);

        tracing::info!(
            "Crawl {}: {} items recorded in {:?}",
            termination,
            summary.total(),
            ctx.started.elapsed()
        );

        let output = &self.config.output;
        write_site_map(
            self.sink.as_ref(),
            &export,
            &output.map_file,
            &output.structure_file,
        )?;

        self.reporter.on_crawl_complete(&summary);

        Ok(CrawlReport { export, summary })
    }
}

/// Waits for every worker, logging any that panicked
async fn join_workers(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!("Crawl worker panicked: {}", e);
            }
        }
    }
}

/// State shared by the workers of one crawl
struct CrawlContext {
    frontier: Frontier,
    builder: SiteMapBuilder,
    fetcher: Fetcher,
    policy: LinkPolicy,
    seed_origin: Origin,
    sink: Arc<dyn ContentSink>,
    reporter: Arc<dyn Reporter>,

    /// Items popped but not yet recorded, by URL key
    active: Mutex<HashMap<String, CrawlItem>>,

    /// Extracted documents and their references, by URL key
    expanded: Mutex<HashMap<String, Expanded>>,

    completed: AtomicU64,
    retries: AtomicU64,
    warnings: AtomicU64,
    started: Instant,
}

/// A document whose references were extracted
struct Expanded {
    item: CrawlItem,
    references: Vec<(Url, ResourceKind)>,
}

impl CrawlContext {
    async fn work(&self, id: usize) {
        tracing::trace!("Worker {} started", id);
        while let Some(guard) = self.frontier.pop().await {
            self.process(guard).await;
        }
        tracing::trace!("Worker {} finished", id);
    }

    /// Takes one item from dispatch to done
    ///
    /// The in-flight guard is held until the item's children are in the
    /// frontier.
    async fn process(&self, guard: InFlight<'_>) {
        let item = guard.item().clone();
        let key = item.key();
        let mut state = ItemState::Queued;

        self.set_active(&key, Some(&item));
        self.transition(&item, &mut state, ItemState::Dispatched);

        tracing::debug!("Processing {} (depth {}, {})", item.url, item.depth, item.kind);
        self.transition(&item, &mut state, ItemState::Fetching);
        let result = self.fetcher.fetch(&item.url).await;
        self.retries
            .fetch_add(u64::from(result.retries()), Ordering::Relaxed);

        match &result.error {
            Some(error) => {
                self.transition(&item, &mut state, ItemState::Failed);
                self.builder
                    .record(&item, NodeOutcome::failed(item.kind, error.to_string()));
            }
            None => {
                self.transition(&item, &mut state, ItemState::Succeeded);
                self.handle_success(item.clone(), &result, &mut state);
            }
        }

        self.transition(&item, &mut state, ItemState::Done);
        self.set_active(&key, None);
        drop(guard);

        self.log_progress();
    }

    /// Stores the content, records the node and enqueues what it references
    fn handle_success(&self, item: CrawlItem, result: &FetchResult, state: &mut ItemState) {
        let kind = refine_kind(item.kind, result.content_type.as_deref());
        // A shorter path may have turned up while the item was being fetched
        let depth = self.frontier.depth_of(&item.url).map_or(item.depth, |d| d.min(item.depth));
        let item = CrawlItem { kind, depth, ..item };

        let candidate = local_path_for(&item.url, kind, &self.seed_origin);
        let local_path = self
            .builder
            .reserve_local_path(&item.url, &candidate, &result.body);

        if let Err(e) = self.sink.store(&local_path, &result.body) {
            tracing::warn!("Failed to store {} at {}: {}", item.url, local_path, e);
            self.builder
                .record(&item, NodeOutcome::failed(kind, e.to_string()));
            return;
        }

        self.builder
            .record(&item, NodeOutcome::success(kind, local_path));

        if matches!(kind, ResourceKind::Page | ResourceKind::Css) {
            let extraction = extract(&item, result, &self.policy);
            self.transition(&item, state, ItemState::Extracted);
            self.remember(&item, &extraction);
            self.enqueue(&item, extraction);

            // Covers a shallower rediscovery that raced with remember()
            if let Some(depth) = self.frontier.depth_of(&item.url) {
                self.revisit(&item.url, depth);
            }
        }
    }

    fn remember(&self, item: &CrawlItem, extraction: &Extraction) {
        let references = extraction
            .items
            .iter()
            .chain(extraction.skipped.iter().map(|skipped| &skipped.item))
            .map(|child| (child.url.clone(), child.kind))
            .collect();
        let mut expanded = self.expanded.lock().unwrap_or_else(PoisonError::into_inner);
        expanded.insert(
            item.key(),
            Expanded {
                item: item.clone(),
                references,
            },
        );
    }

    /// Re-admits the references of an extracted document now known at `depth`
    ///
    /// Links pruned by depth the first time around may now be in range, and
    /// already known children move up with their parent. Does nothing unless
    /// `depth` is shallower than the depth the document was extracted at.
    fn revisit(&self, url: &Url, depth: u32) {
        let (parent, references) = {
            let mut expanded = self.expanded.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = expanded.get_mut(&url_key(url)) else {
                return;
            };
            if entry.item.depth <= depth {
                return;
            }
            entry.item.depth = depth;
            (entry.item.clone(), entry.references.clone())
        };

        tracing::debug!("{} reached at depth {}, revisiting its links", url, depth);
        let mut extraction = Extraction::default();
        for (child, kind) in references {
            match self.policy.admit(child, kind, &parent) {
                Ok(item) => extraction.items.push(item),
                Err(skipped) => extraction.skipped.push(skipped),
            }
        }
        self.enqueue(&parent, extraction);
    }

    fn enqueue(&self, parent: &CrawlItem, extraction: Extraction) {
        for warning in &extraction.warnings {
            tracing::warn!("{}", warning);
        }
        self.warnings
            .fetch_add(extraction.warnings.len() as u64, Ordering::Relaxed);

        let mut discovered = 0;
        for child in extraction.items {
            self.builder
                .note_reference(&child.url, &parent.url, parent.depth, parent.kind);
            let url = child.url.clone();
            let depth = child.depth;
            match self.frontier.push(child) {
                PushOutcome::New => {
                    discovered += 1;
                    self.reporter.on_discover(&url, &parent.url);
                }
                PushOutcome::Shallower { previous } => {
                    tracing::trace!("{} moved from depth {} to {}", url, previous, depth);
                    self.revisit(&url, depth);
                }
                PushOutcome::Known => {}
            }
        }

        for skipped in extraction.skipped {
            let child = &skipped.item;
            self.builder
                .note_reference(&child.url, &parent.url, parent.depth, parent.kind);
            if !self.frontier.contains(&child.url) {
                self.builder
                    .record(child, NodeOutcome::skipped(child.kind, skipped.reason));
            }
        }

        tracing::trace!("{} new items discovered on {}", discovered, parent.url);
    }

    fn transition(&self, item: &CrawlItem, state: &mut ItemState, next: ItemState) {
        let from = *state;
        match state.advance(next) {
            Ok(()) => tracing::trace!("{}: {} -> {}", item.url, from.as_str(), next.as_str()),
            Err(e) => tracing::error!("{}: {}", item.url, e),
        }
    }

    fn set_active(&self, key: &str, item: Option<&CrawlItem>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match item {
            Some(item) => {
                active.insert(key.to_string(), item.clone());
            }
            None => {
                active.remove(key);
            }
        }
    }

    /// Records items whose workers were interrupted mid-flight
    fn record_interrupted(&self) {
        let interrupted: Vec<CrawlItem> = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.drain().map(|(_, item)| item).collect()
        };
        for item in interrupted {
            tracing::debug!("Interrupted while processing {}", item.url);
            self.builder.record(
                &item,
                NodeOutcome::failed(item.kind, FetchError::Cancelled.to_string()),
            );
        }
    }

    /// Records items still queued when the crawl stopped early
    fn record_abandoned(&self, termination: TerminationReason) {
        let reason = match termination {
            TerminationReason::Cancelled => SkipReason::Cancelled,
            TerminationReason::CeilingReached | TerminationReason::Completed => {
                SkipReason::CeilingReached
            }
        };

        let remaining = self.frontier.drain();
        if !remaining.is_empty() {
            tracing::info!("{} queued items not fetched ({})", remaining.len(), reason);
        }
        for item in remaining {
            self.builder
                .record(&item, NodeOutcome::skipped(item.kind, reason));
        }
    }

    fn log_progress(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % PROGRESS_INTERVAL == 0 {
            let elapsed = self.started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                0.0
            };
            tracing::info!(
                "Progress: {} items done, {} in frontier, {} in flight, {:.2} items/sec",
                completed,
                self.frontier.len(),
                self.frontier.in_flight(),
                rate
            );
        }
    }
}
