//! Site map module
//!
//! This module assembles the crawl's canonical output:
//! - `SiteNode` / `NodeStatus`: one recorded URL and its outcome
//! - `SiteMapBuilder`: concurrent, order-independent tree and manifest construction
//! - `SiteMapExport`: the serializable tree + flat manifest
//! - local path derivation for stored content

mod builder;
mod export;
mod node;
pub mod paths;

pub use builder::{NodeOutcome, SiteMapBuilder};
pub use export::{SiteMapEntry, SiteMapExport, TreeNode};
pub use node::{NodeStatus, SiteNode, SkipReason};
pub use paths::local_path_for;
