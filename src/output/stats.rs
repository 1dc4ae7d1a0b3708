//! Crawl summary statistics
//!
//! This module provides the end-of-crawl summary computed from the site map
//! manifest, and its terminal rendering.

use crate::sitemap::{NodeStatus, SiteMapEntry, SkipReason};
use crate::url::ResourceKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How the crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Frontier ran dry with nothing in flight
    #[default]
    Completed,
    /// The maximum number of items was dispatched
    CeilingReached,
    /// The crawl was cancelled by the user
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::CeilingReached => "ceiling reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Summary statistics for a crawl
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    // Run metadata
    pub seed: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub termination: TerminationReason,

    // Outcome counts (every manifest entry lands in exactly one)
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,

    // Kind breakdown
    pub pages: u64,
    pub assets: u64,
    pub assets_by_kind: BTreeMap<ResourceKind, u64>,

    // Skip breakdown (reason -> count)
    pub skipped_by_reason: BTreeMap<SkipReason, u64>,

    /// Attempts beyond the first, over all fetches
    pub retries: u64,

    /// Non-fatal extraction warnings (malformed markup)
    pub parse_warnings: u64,
}

impl CrawlSummary {
    /// Creates a new empty crawl summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Tallies the outcome counts from the flat manifest
    pub fn from_manifest<'a>(
        seed: &str,
        entries: impl IntoIterator<Item = &'a SiteMapEntry>,
    ) -> Self {
        let mut summary = Self {
            seed: seed.to_string(),
            ..Self::default()
        };

        for entry in entries {
            match &entry.status {
                NodeStatus::Success => summary.succeeded += 1,
                NodeStatus::Failed { .. } => summary.failed += 1,
                NodeStatus::Skipped { reason } => {
                    summary.skipped += 1;
                    *summary.skipped_by_reason.entry(*reason).or_insert(0) += 1;
                }
            }

            if entry.kind.is_page() {
                summary.pages += 1;
            } else {
                summary.assets += 1;
                *summary.assets_by_kind.entry(entry.kind).or_insert(0) += 1;
            }
        }

        summary
    }

    /// Returns the total number of recorded items
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    /// Returns the success rate of fetched items as a percentage
    ///
    /// Skipped items were never fetched and do not count.
    pub fn success_rate(&self) -> f64 {
        let fetched = self.succeeded + self.failed;
        if fetched == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / fetched as f64) * 100.0
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// Prints the summary to stdout in a formatted manner
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Overview:");
    println!("  Seed: {}", summary.seed);
    println!("  Termination: {}", summary.termination);
    if let Some(secs) = summary.duration_seconds() {
        println!("  Duration: {}s", secs);
    }
    println!();

    println!("Items:");
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed: {}", summary.failed);
    println!("  Skipped: {}", summary.skipped);
    println!("  Pages: {}", summary.pages);
    println!("  Assets: {}", summary.assets);
    for (kind, count) in &summary.assets_by_kind {
        println!("    {}: {}", kind, count);
    }
    println!();

    if !summary.skipped_by_reason.is_empty() {
        println!("Skipped by Reason:");
        for (reason, count) in &summary.skipped_by_reason {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    println!("Retries: {}", summary.retries);
    if summary.parse_warnings > 0 {
        println!("Parse warnings: {}", summary.parse_warnings);
    }

    println!(
        "Success Rate: {:.1}% ({} / {} fetched items)",
        summary.success_rate(),
        summary.succeeded,
        summary.succeeded + summary.failed
    );
}
