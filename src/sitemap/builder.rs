//! Incremental site map construction
//!
//! Workers record nodes as their items finish, in whatever order the network
//! delivers them. The builder keeps two views consistent:
//!
//! - a flat manifest keyed by URL, used for lookups and idempotent recording
//! - a tree rooted at the seed, where each node hangs under its best referrer
//!
//! The best referrer of a URL is the referencing item with the lowest depth,
//! pages before assets, then the smallest URL. Because the choice depends only
//! on the set of references and not on their arrival order, the final tree is
//! the same for the same crawl results. A node whose parent has not been
//! recorded yet waits in a pending buffer and is attached when the parent
//! arrives.
//!
//! A node's depth follows its best referrer: one below it for pages, level
//! with it for assets. A URL first reached along a long path moves up when a
//! shorter path turns up.

use crate::crawler::CrawlItem;
use crate::sitemap::export::{SiteMapEntry, SiteMapExport, TreeNode};
use crate::sitemap::node::{NodeStatus, SiteNode, SkipReason};
use crate::sitemap::paths::with_suffix;
use crate::url::{url_key, ResourceKind};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// What is known about an item once it is finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    /// Final kind (asset kinds may have been refined from the content type)
    pub kind: ResourceKind,
    pub local_path: Option<String>,
    pub status: NodeStatus,
}

impl NodeOutcome {
    pub fn success(kind: ResourceKind, local_path: String) -> Self {
        Self {
            kind,
            local_path: Some(local_path),
            status: NodeStatus::Success,
        }
    }

    pub fn failed(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            local_path: None,
            status: NodeStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn skipped(kind: ResourceKind, reason: SkipReason) -> Self {
        Self {
            kind,
            local_path: None,
            status: NodeStatus::Skipped { reason },
        }
    }
}

/// Ranking of a candidate parent; smaller is better
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Referrer {
    depth: u32,
    asset: bool,
    url: String,
}

impl Referrer {
    /// Depth of a child of this referrer
    fn child_depth(&self, kind: ResourceKind) -> u32 {
        if kind.is_page() {
            self.depth + 1
        } else {
            self.depth
        }
    }
}

#[derive(Debug, Default)]
struct BuilderInner {
    nodes: BTreeMap<String, SiteNode>,
    referrers: HashMap<String, Referrer>,
    pending: HashMap<String, BTreeSet<String>>,
    paths: HashMap<String, String>,
}

impl BuilderInner {
    /// Hangs `child` under `parent`, or parks it until `parent` is recorded
    fn attach(&mut self, child: &str, parent: &str) {
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent_url = Some(parent.to_string());
        }
        match self.nodes.get_mut(parent) {
            Some(parent_node) => parent_node.add_child(child),
            None => {
                tracing::trace!("Parking {} until {} is recorded", child, parent);
                self.pending
                    .entry(parent.to_string())
                    .or_default()
                    .insert(child.to_string());
            }
        }
    }

    fn detach(&mut self, child: &str, parent: &str) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.remove_child(child);
        }
        if let Some(waiting) = self.pending.get_mut(parent) {
            waiting.remove(child);
            if waiting.is_empty() {
                self.pending.remove(parent);
            }
        }
    }

    /// Returns true if `child` is an ancestor of `candidate` (or the same node)
    fn would_cycle(&self, child: &str, candidate: &str) -> bool {
        let mut current = candidate;
        for _ in 0..=self.referrers.len() {
            if current == child {
                return true;
            }
            match self.referrers.get(current) {
                Some(referrer) => current = &referrer.url,
                None => return false,
            }
        }
        true
    }

    fn subtree(&self, key: &str, visited: &mut HashSet<String>) -> Option<TreeNode> {
        if !visited.insert(key.to_string()) {
            return None;
        }
        let node = self.nodes.get(key)?;
        let children = node
            .children
            .iter()
            .filter_map(|child| self.subtree(child, visited))
            .collect();
        Some(TreeNode {
            entry: SiteMapEntry::from(node),
            children,
        })
    }
}

/// Thread-safe site map builder shared by the crawl workers
#[derive(Debug)]
pub struct SiteMapBuilder {
    seed: String,
    inner: Mutex<BuilderInner>,
}

impl SiteMapBuilder {
    pub fn new(seed: &Url) -> Self {
        Self {
            seed: url_key(seed),
            inner: Mutex::new(BuilderInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BuilderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Notes that `parent` references `child`
    ///
    /// Called for every reference, including references to URLs that were
    /// already enqueued. If the new referrer ranks better than the current
    /// one and the child is already recorded, the child is moved.
    pub fn note_reference(
        &self,
        child: &Url,
        parent: &Url,
        parent_depth: u32,
        parent_kind: ResourceKind,
    ) {
        let child_key = url_key(child);
        let parent_key = url_key(parent);
        if child_key == self.seed || child_key == parent_key {
            return;
        }

        let candidate = Referrer {
            depth: parent_depth,
            asset: parent_kind.is_asset(),
            url: parent_key,
        };

        let mut inner = self.lock();
        if let Some(current) = inner.referrers.get(&child_key) {
            if *current <= candidate {
                return;
            }
        }
        if inner.would_cycle(&child_key, &candidate.url) {
            return;
        }

        let new_parent = candidate.url.clone();
        let recorded = inner.nodes.get_mut(&child_key).map(|node| {
            let depth = candidate.child_depth(node.kind);
            if depth < node.depth {
                tracing::trace!("{} moves up to depth {}", node.url, depth);
                node.depth = depth;
            }
            node.parent_url.clone()
        });
        inner.referrers.insert(child_key.clone(), candidate);

        let Some(old_parent) = recorded else {
            return;
        };
        if let Some(old_parent) = old_parent {
            inner.detach(&child_key, &old_parent);
        }
        tracing::trace!("Re-attaching {} under {}", child_key, new_parent);
        inner.attach(&child_key, &new_parent);
    }

    /// Records the outcome of an item and returns its node
    ///
    /// Recording a URL twice is a no-op returning the existing node, with one
    /// exception: a skip record is provisional and is replaced when the same
    /// URL is later fetched.
    ///
    /// The node's depth is the smaller of the item's depth and the depth
    /// implied by its best referrer.
    pub fn record(&self, item: &CrawlItem, outcome: NodeOutcome) -> SiteNode {
        let key = item.key();
        let mut inner = self.lock();

        let referrer = if key == self.seed {
            None
        } else {
            inner.referrers.get(&key).cloned()
        };
        let depth = referrer
            .as_ref()
            .map_or(item.depth, |r| item.depth.min(r.child_depth(outcome.kind)));

        if let Some(existing) = inner.nodes.get_mut(&key) {
            if existing.status.is_skipped() && !outcome.status.is_skipped() {
                tracing::debug!("Fetched outcome replaces skip record for {}", key);
                existing.kind = outcome.kind;
                existing.local_path = outcome.local_path;
                existing.status = outcome.status;
                existing.depth = depth;
            }
            return existing.clone();
        }

        let parent = if key == self.seed {
            None
        } else {
            referrer
                .map(|referrer| referrer.url)
                .or_else(|| item.discovered_from.as_ref().map(url_key))
        };

        let mut node = SiteNode {
            url: key.clone(),
            kind: outcome.kind,
            local_path: outcome.local_path,
            parent_url: None,
            children: Vec::new(),
            status: outcome.status,
            depth,
        };
        if let Some(waiting) = inner.pending.remove(&key) {
            for child in waiting {
                node.add_child(&child);
            }
        }
        node.parent_url = parent.clone();
        inner.nodes.insert(key.clone(), node.clone());

        if let Some(parent) = parent {
            inner.attach(&key, &parent);
        }

        node
    }

    /// Returns the node recorded for a URL
    pub fn get(&self, url: &Url) -> Option<SiteNode> {
        self.lock().nodes.get(&url_key(url)).cloned()
    }

    /// Returns true if a node (of any status) exists for the URL
    pub fn contains(&self, url: &Url) -> bool {
        self.lock().nodes.contains_key(&url_key(url))
    }

    /// Number of recorded nodes
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches an already-recorded child under `parent`
    ///
    /// If `parent` is not recorded yet, the child is buffered and attached
    /// when it is.
    pub fn attach_child(&self, parent: &Url, child: &Url) {
        let child_key = url_key(child);
        let parent_key = url_key(parent);
        if child_key == parent_key || child_key == self.seed {
            return;
        }

        let mut inner = self.lock();
        if inner.would_cycle(&child_key, &parent_key) {
            return;
        }
        let old_parent = inner
            .nodes
            .get(&child_key)
            .and_then(|node| node.parent_url.clone());
        if let Some(old_parent) = old_parent {
            inner.detach(&child_key, &old_parent);
        }
        inner.attach(&child_key, &parent_key);
    }

    /// Claims a local path for `url`, making paths unique within the run
    ///
    /// The derived `candidate` is used as-is unless another URL already owns
    /// it; then a short hash of the content is appended, lengthened (and
    /// finally counted) until the path is free.
    pub fn reserve_local_path(&self, url: &Url, candidate: &str, content: &[u8]) -> String {
        let key = url_key(url);
        let mut inner = self.lock();

        let mut claim = |path: String| -> Option<String> {
            let owner = inner.paths.get(&path).cloned();
            match owner {
                Some(owner) if owner != key => None,
                Some(_) => Some(path),
                None => {
                    inner.paths.insert(path.clone(), key.clone());
                    Some(path)
                }
            }
        };

        if let Some(path) = claim(candidate.to_string()) {
            return path;
        }

        let hash = hex::encode(Sha256::digest(content));
        for len in [8, 16, 64] {
            if let Some(path) = claim(with_suffix(candidate, &hash[..len])) {
                tracing::debug!("Local path {} taken, using {}", candidate, path);
                return path;
            }
        }

        let mut counter = 1u64;
        loop {
            let suffix = format!("{}-{}", &hash[..8], counter);
            if let Some(path) = claim(with_suffix(candidate, &suffix)) {
                return path;
            }
            counter += 1;
        }
    }

    /// Produces the tree and the flat manifest
    pub fn export(&self) -> SiteMapExport {
        let inner = self.lock();
        let manifest: Vec<SiteMapEntry> = inner.nodes.values().map(SiteMapEntry::from).collect();

        let mut visited = HashSet::new();
        let root = inner.subtree(&self.seed, &mut visited);

        // Subtrees whose parent never arrived, then anything left over
        let mut unattached = Vec::new();
        for (key, node) in &inner.nodes {
            let orphan = match &node.parent_url {
                Some(parent) => !inner.nodes.contains_key(parent),
                None => *key != self.seed,
            };
            if orphan {
                unattached.extend(inner.subtree(key, &mut visited));
            }
        }
        for key in inner.nodes.keys() {
            if !visited.contains(key) {
                unattached.extend(inner.subtree(key, &mut visited));
            }
        }

        SiteMapExport {
            seed: self.seed.clone(),
            root,
            unattached,
            manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn item(u: &str, depth: u32, kind: ResourceKind, from: Option<&str>) -> CrawlItem {
        CrawlItem {
            url: url(u),
            depth,
            kind,
            discovered_from: from.map(url),
        }
    }

    fn ok(kind: ResourceKind) -> NodeOutcome {
        NodeOutcome::success(kind, "x".to_string())
    }

    const SEED: &str = "https://example.com/";

    #[test]
    fn test_record_is_idempotent() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let seed = item(SEED, 0, ResourceKind::Page, None);

        let first = builder.record(&seed, ok(ResourceKind::Page));
        let second = builder.record(&seed, NodeOutcome::failed(ResourceKind::Page, "HTTP 500"));

        assert_eq!(first, second);
        assert!(second.status.is_success());
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_fetch_replaces_skip_record() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let page = item("https://example.com/a", 1, ResourceKind::Page, Some(SEED));

        let ceiling = NodeOutcome::skipped(ResourceKind::Page, SkipReason::CeilingReached);
        builder.record(&page, ceiling);
        let node = builder.record(&page, ok(ResourceKind::Page));
        assert!(node.status.is_success());

        // But a skip never replaces a fetched outcome
        let cancelled = NodeOutcome::skipped(ResourceKind::Page, SkipReason::Cancelled);
        let node = builder.record(&page, cancelled);
        assert!(node.status.is_success());
    }

    #[test]
    fn test_child_before_parent_is_buffered() {
        let builder = SiteMapBuilder::new(&url(SEED));

        let child = item(
            "https://example.com/b",
            2,
            ResourceKind::Page,
            Some("https://example.com/a"),
        );
        builder.record(&child, ok(ResourceKind::Page));

        let export = builder.export();
        assert!(export.root.is_none());
        assert_eq!(export.unattached.len(), 1);

        let a = item("https://example.com/a", 1, ResourceKind::Page, Some(SEED));
        builder.record(&a, ok(ResourceKind::Page));
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));

        let export = builder.export();
        let root = export.root.unwrap();
        assert_eq!(root.node_count(), 3);
        assert_eq!(root.children[0].entry.url, "https://example.com/a");
        assert_eq!(root.children[0].children[0].entry.url, "https://example.com/b");
        assert!(export.unattached.is_empty());
    }

    #[test]
    fn test_best_referrer_independent_of_order() {
        let build = |reverse: bool| {
            let builder = SiteMapBuilder::new(&url(SEED));
            builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
            for p in ["https://example.com/a", "https://example.com/b"] {
                builder.record(&item(p, 1, ResourceKind::Page, Some(SEED)), ok(ResourceKind::Page));
                builder.note_reference(&url(p), &url(SEED), 0, ResourceKind::Page);
            }

            let shared = url("https://example.com/shared.css");
            let mut referrers = vec!["https://example.com/b", "https://example.com/a"];
            if reverse {
                referrers.reverse();
            }
            for (i, r) in referrers.iter().enumerate() {
                builder.note_reference(&shared, &url(r), 1, ResourceKind::Page);
                if i == 0 {
                    builder.record(
                        &item(shared.as_str(), 1, ResourceKind::Css, Some(r)),
                        ok(ResourceKind::Css),
                    );
                }
            }
            builder.export()
        };

        let forward = build(false);
        let backward = build(true);
        assert_eq!(forward, backward);

        let css = forward.entry("https://example.com/shared.css").unwrap();
        assert_eq!(css.parent_url.as_deref(), Some("https://example.com/a"));
        let a = forward.root.as_ref().unwrap().find("https://example.com/a").unwrap();
        assert_eq!(a.children.len(), 1);
        let b = forward.root.as_ref().unwrap().find("https://example.com/b").unwrap();
        assert!(b.children.is_empty());
    }

    #[test]
    fn test_shallower_referrer_wins() {
        let builder = SiteMapBuilder::new(&url(SEED));
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
        let a = item("https://example.com/a", 1, ResourceKind::Page, Some(SEED));
        builder.record(&a, ok(ResourceKind::Page));

        let x = url("https://example.com/x");
        builder.note_reference(&x, &url("https://example.com/a"), 1, ResourceKind::Page);
        builder.record(&item(x.as_str(), 2, ResourceKind::Page, None), ok(ResourceKind::Page));
        builder.note_reference(&x, &url(SEED), 0, ResourceKind::Page);

        let node = builder.get(&x).unwrap();
        assert_eq!(node.parent_url.as_deref(), Some(SEED));
        let a = builder.get(&url("https://example.com/a")).unwrap();
        assert!(a.children.is_empty());
    }

    #[test]
    fn test_depth_follows_best_referrer() {
        let builder = SiteMapBuilder::new(&url(SEED));
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
        let a = url("https://example.com/a");
        let b = url("https://example.com/c/b");
        builder.note_reference(&a, &url(SEED), 0, ResourceKind::Page);
        let a_item = item(a.as_str(), 1, ResourceKind::Page, Some(SEED));
        builder.record(&a_item, ok(ResourceKind::Page));

        // x reached through a longer path first
        let x = url("https://example.com/x");
        builder.note_reference(&x, &b, 2, ResourceKind::Page);
        let x_item = item(x.as_str(), 3, ResourceKind::Page, Some(b.as_str()));
        builder.record(&x_item, ok(ResourceKind::Page));
        let logo = url("https://example.com/logo.png");
        builder.note_reference(&logo, &x, 3, ResourceKind::Page);
        let logo_item = item(logo.as_str(), 3, ResourceKind::Image, Some(x.as_str()));
        builder.record(&logo_item, ok(ResourceKind::Image));
        assert_eq!(builder.get(&x).unwrap().depth, 3);

        // Then through a, one level up
        builder.note_reference(&x, &a, 1, ResourceKind::Page);
        let node = builder.get(&x).unwrap();
        assert_eq!(node.depth, 2);
        assert_eq!(node.parent_url.as_deref(), Some(a.as_str()));

        // Assets stay level with their referrer
        builder.note_reference(&logo, &x, 2, ResourceKind::Page);
        assert_eq!(builder.get(&logo).unwrap().depth, 2);
    }

    #[test]
    fn test_record_takes_referrer_depth() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let x = url("https://example.com/x");
        builder.note_reference(&x, &url("https://example.com/a"), 1, ResourceKind::Page);

        // The item was dispatched at depth 3 before the shorter path was known
        let node = builder.record(
            &item(x.as_str(), 3, ResourceKind::Page, Some("https://example.com/c/b")),
            ok(ResourceKind::Page),
        );
        assert_eq!(node.depth, 2);
        assert_eq!(node.parent_url.as_deref(), Some("https://example.com/a"));
    }

    #[test]
    fn test_self_reference_and_seed_never_get_parents() {
        let builder = SiteMapBuilder::new(&url(SEED));
        builder.note_reference(&url(SEED), &url(SEED), 0, ResourceKind::Page);
        builder.note_reference(&url(SEED), &url("https://example.com/a"), 1, ResourceKind::Page);
        let root = builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
        assert!(root.parent_url.is_none());
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_reference_cycle_rejected() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let a = url("https://example.com/a.css");
        let b = url("https://example.com/b.css");

        builder.note_reference(&b, &a, 1, ResourceKind::Css);
        // b is a's descendant; making b a's parent would orphan both
        builder.note_reference(&a, &b, 1, ResourceKind::Css);

        builder.record(&item(a.as_str(), 1, ResourceKind::Css, None), ok(ResourceKind::Css));
        builder.record(&item(b.as_str(), 1, ResourceKind::Css, None), ok(ResourceKind::Css));
        assert_eq!(builder.get(&a).unwrap().parent_url, None);
        assert_eq!(builder.get(&b).unwrap().parent_url.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_attach_child() {
        let builder = SiteMapBuilder::new(&url(SEED));
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
        let orphan = item("https://example.com/o", 1, ResourceKind::Page, None);
        builder.record(&orphan, ok(ResourceKind::Page));
        assert_eq!(builder.export().unattached.len(), 1);

        builder.attach_child(&url(SEED), &orphan.url);
        let export = builder.export();
        assert!(export.unattached.is_empty());
        assert_eq!(export.root.unwrap().children.len(), 1);
    }

    #[test]
    fn test_manifest_has_every_node_once() {
        let builder = SiteMapBuilder::new(&url(SEED));
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));
        builder.record(
            &item("https://cdn.other.com/logo.png", 0, ResourceKind::Image, Some(SEED)),
            NodeOutcome::skipped(ResourceKind::Image, SkipReason::ExternalOrigin),
        );
        builder.record(&item(SEED, 0, ResourceKind::Page, None), ok(ResourceKind::Page));

        let export = builder.export();
        assert_eq!(export.manifest.len(), 2);
        let mut keys: Vec<_> = export.manifest.iter().map(|e| e.url.clone()).collect();
        keys.dedup();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_reserve_local_path_collisions() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let first = url("https://example.com/a/logo.png");
        let second = url("https://example.com/b/logo.png");

        let p1 = builder.reserve_local_path(&first, "assets/images/logo.png", b"one");
        let p2 = builder.reserve_local_path(&second, "assets/images/logo.png", b"two");
        assert_eq!(p1, "assets/images/logo.png");
        assert_ne!(p1, p2);
        assert!(p2.starts_with("assets/images/logo-"));
        assert!(p2.ends_with(".png"));

        // Same URL again keeps its path
        assert_eq!(
            builder.reserve_local_path(&first, "assets/images/logo.png", b"one"),
            p1
        );
    }

    #[test]
    fn test_reserve_local_path_identical_content() {
        let builder = SiteMapBuilder::new(&url(SEED));
        let paths: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|d| {
                builder.reserve_local_path(
                    &url(&format!("https://example.com/{}/x.js", d)),
                    "assets/js/x.js",
                    b"same",
                )
            })
            .collect();

        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 3);
    }
}
