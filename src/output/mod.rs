//! Output module: the crawl's collaborators and reports
//!
//! This module handles:
//! - Content sinks that persist fetched bytes
//! - Reporters that receive crawl progress events
//! - Summary statistics and their terminal rendering
//! - Writing the JSON site map and the readable structure listing

mod reporter;
mod sink;
pub mod stats;
mod structure;

pub use reporter::{NullReporter, Reporter, TracingReporter};
pub use sink::{validate_local_path, ContentSink, FsSink, MemorySink, SinkError};
pub use stats::{print_summary, CrawlSummary, TerminationReason};
pub use structure::{render_structure, write_site_map, StructureListing};
