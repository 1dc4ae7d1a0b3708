use crate::url::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an item was recorded without being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Link to another origin while external links are not followed
    ExternalOrigin,
    /// Page link beyond the maximum depth
    DepthExceeded,
    /// Asset of a kind excluded by configuration
    AssetKindNotAllowed,
    /// Still queued when the item ceiling was reached
    CeilingReached,
    /// Still queued when the crawl was cancelled
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalOrigin => "external_origin",
            Self::DepthExceeded => "depth_exceeded",
            Self::AssetKindNotAllowed => "asset_kind_not_allowed",
            Self::CeilingReached => "ceiling_reached",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for a site map node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed { reason } => write!(f, "failed ({})", reason),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason),
        }
    }
}

/// One URL in the site map
///
/// Children are URL keys of the nodes attached below this one, kept sorted so
/// the tree does not depend on the order in which fetches completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteNode {
    pub url: String,
    pub kind: ResourceKind,
    /// Path the content was stored under; None when nothing was stored
    pub local_path: Option<String>,
    pub parent_url: Option<String>,
    pub children: Vec<String>,
    pub status: NodeStatus,
    pub depth: u32,
}

impl SiteNode {
    /// Inserts a child key in sorted position; duplicates are ignored
    pub(crate) fn add_child(&mut self, child: &str) {
        if let Err(pos) = self.children.binary_search_by(|c| c.as_str().cmp(child)) {
            self.children.insert(pos, child.to_string());
        }
    }

    pub(crate) fn remove_child(&mut self, child: &str) {
        self.children.retain(|c| c != child);
    }
}
