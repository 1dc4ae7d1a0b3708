use crate::sitemap::node::{NodeStatus, SiteNode};
use crate::url::ResourceKind;
use serde::{Deserialize, Serialize};

/// Flat representation of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMapEntry {
    pub url: String,
    pub kind: ResourceKind,
    pub local_path: Option<String>,
    pub status: NodeStatus,
    /// Depth from the seed along the shortest known path
    ///
    /// For fetched pages this never exceeds the configured maximum. A page
    /// skipped with `DepthExceeded` carries the depth it would have had,
    /// which is one past the maximum.
    pub depth: u32,
    pub parent_url: Option<String>,
}

impl From<&SiteNode> for SiteMapEntry {
    fn from(node: &SiteNode) -> Self {
        Self {
            url: node.url.clone(),
            kind: node.kind,
            local_path: node.local_path.clone(),
            status: node.status.clone(),
            depth: node.depth,
            parent_url: node.parent_url.clone(),
        }
    }
}

/// Hierarchical representation: an entry and its attached children
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub entry: SiteMapEntry,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, this one included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    /// Finds a node in this subtree by URL key
    pub fn find(&self, url: &str) -> Option<&TreeNode> {
        if self.entry.url == url {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(url))
    }
}

/// The canonical structured output of a crawl
///
/// `manifest` holds every recorded node, sorted by URL key, whatever its
/// attachment state. `root` is the tree below the seed; subtrees whose
/// parent was never recorded are listed under `unattached`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteMapExport {
    pub seed: String,
    pub root: Option<TreeNode>,
    pub unattached: Vec<TreeNode>,
    pub manifest: Vec<SiteMapEntry>,
}

impl SiteMapExport {
    pub fn entry(&self, url: &str) -> Option<&SiteMapEntry> {
        self.manifest
            .binary_search_by(|e| e.url.as_str().cmp(url))
            .ok()
            .map(|i| &self.manifest[i])
    }

    pub fn pages(&self) -> impl Iterator<Item = &SiteMapEntry> {
        self.manifest.iter().filter(|e| e.kind.is_page())
    }

    pub fn assets(&self) -> impl Iterator<Item = &SiteMapEntry> {
        self.manifest.iter().filter(|e| e.kind.is_asset())
    }

    /// Renders the export as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, kind: ResourceKind) -> SiteMapEntry {
        SiteMapEntry {
            url: url.to_string(),
            kind,
            local_path: None,
            status: NodeStatus::Success,
            depth: 0,
            parent_url: None,
        }
    }

    #[test]
    fn test_tree_node_flattens_entry() {
        let tree = TreeNode {
            entry: entry("https://example.com/", ResourceKind::Page),
            children: vec![TreeNode {
                entry: entry("https://example.com/a.css", ResourceKind::Css),
                children: Vec::new(),
            }],
        };

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["url"], "https://example.com/");
        assert_eq!(value["kind"], "page");
        assert_eq!(value["status"]["state"], "success");
        assert_eq!(value["children"][0]["kind"], "css");
        assert_eq!(tree.node_count(), 2);
        assert!(tree.find("https://example.com/a.css").is_some());
    }

    #[test]
    fn test_lookup_and_filters() {
        let export = SiteMapExport {
            seed: "https://example.com/".to_string(),
            root: None,
            unattached: Vec::new(),
            manifest: vec![
                entry("https://example.com/", ResourceKind::Page),
                entry("https://example.com/a.css", ResourceKind::Css),
                entry("https://example.com/b", ResourceKind::Page),
            ],
        };

        assert!(export.entry("https://example.com/b").is_some());
        assert!(export.entry("https://example.com/zzz").is_none());
        assert_eq!(export.pages().count(), 2);
        assert_eq!(export.assets().count(), 1);
    }
}
