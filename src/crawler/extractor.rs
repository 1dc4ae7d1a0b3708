//! Link extraction for HTML and CSS
//!
//! This module handles parsing fetched content to discover:
//! - Page links (from `<a>`, `<area>` and canonical links)
//! - Asset references (stylesheets, scripts, images, fonts, media)
//! - CSS `url(...)` and `@import` references, inline and in stylesheets
//!
//! Every discovered reference is run through the [`LinkPolicy`], which turns
//! it into either a crawl item or a skip record.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::FetchResult;
use crate::crawler::frontier::CrawlItem;
use crate::sitemap::SkipReason;
use crate::url::{classify, is_css_content_type, is_html_content_type, normalize_url, url_key};
use crate::url::{Origin, ResourceKind};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Decides what happens to a discovered reference
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    seed: Origin,
    max_depth: u32,
    follow_external: bool,
    allowed_assets: Vec<ResourceKind>,
}

impl LinkPolicy {
    pub fn new(
        seed: Origin,
        max_depth: u32,
        follow_external: bool,
        allowed_assets: Vec<ResourceKind>,
    ) -> Self {
        Self {
            seed,
            max_depth,
            follow_external,
            allowed_assets,
        }
    }

    pub fn from_config(config: &CrawlerConfig, seed: Origin) -> Self {
        Self::new(
            seed,
            config.max_depth,
            config.follow_external_links,
            config.allowed_asset_kinds.clone(),
        )
    }

    pub fn seed(&self) -> &Origin {
        &self.seed
    }

    /// Applies the policy to a reference found on `parent`
    ///
    /// Pages go one level deeper than their referrer and are pruned past
    /// `max_depth`; assets keep the referrer's depth and are never pruned by
    /// depth.
    pub fn admit(
        &self,
        url: Url,
        kind: ResourceKind,
        parent: &CrawlItem,
    ) -> Result<CrawlItem, SkippedLink> {
        let (depth, verdict) = if kind.is_page() {
            let depth = parent.depth + 1;
            let verdict = (depth > self.max_depth).then_some(SkipReason::DepthExceeded);
            (depth, verdict)
        } else {
            let verdict = (!self.allowed_assets.contains(&kind))
                .then_some(SkipReason::AssetKindNotAllowed);
            (parent.depth, verdict)
        };

        let verdict = if !self.follow_external && !self.seed.contains(&url) {
            Some(SkipReason::ExternalOrigin)
        } else {
            verdict
        };

        let item = CrawlItem {
            url,
            depth,
            kind,
            discovered_from: Some(parent.url.clone()),
        };
        match verdict {
            None => Ok(item),
            Some(reason) => Err(SkippedLink { item, reason }),
        }
    }
}

/// A reference that will not be fetched, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLink {
    pub item: CrawlItem,
    pub reason: SkipReason,
}

/// Everything discovered in one fetched document
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// References admitted for crawling
    pub items: Vec<CrawlItem>,

    /// References recorded but never fetched
    pub skipped: Vec<SkippedLink>,

    /// Non-fatal problems met while parsing
    pub warnings: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.skipped.is_empty()
    }

    /// Total number of distinct references found
    pub fn reference_count(&self) -> usize {
        self.items.len() + self.skipped.len()
    }
}

/// Collects references, deduplicating within a single document
struct Collector<'a> {
    parent: &'a CrawlItem,
    policy: &'a LinkPolicy,
    seen: HashSet<String>,
    out: Extraction,
}

impl<'a> Collector<'a> {
    fn new(parent: &'a CrawlItem, policy: &'a LinkPolicy) -> Self {
        let mut seen = HashSet::new();
        seen.insert(parent.key());
        Self {
            parent,
            policy,
            seen,
            out: Extraction::default(),
        }
    }

    /// Resolves `raw` against `base` and admits it with the given kind
    ///
    /// With `Kind::AssetOr`, the kind comes from the URL itself and the
    /// fallback is used when the URL looks like a page.
    fn add(&mut self, raw: &str, base: &Url, kind: Kind) {
        let Some(url) = resolve(raw, base) else {
            return;
        };
        if !self.seen.insert(url_key(&url)) {
            return;
        }

        let kind = match kind {
            Kind::Exact(kind) => kind,
            Kind::Classified => classify(&url),
            Kind::AssetOr(fallback) => match classify(&url) {
                ResourceKind::Page => fallback,
                kind => kind,
            },
        };

        match self.policy.admit(url, kind, self.parent) {
            Ok(item) => self.out.items.push(item),
            Err(skipped) => {
                tracing::trace!("Skipping {} ({})", skipped.item.url, skipped.reason);
                self.out.skipped.push(skipped);
            }
        }
    }

    fn add_css(&mut self, css: &str, base: &Url) {
        for reference in css_references(css) {
            let kind = if reference.import {
                Kind::Exact(ResourceKind::Css)
            } else {
                Kind::AssetOr(ResourceKind::Other)
            };
            self.add(reference.target, base, kind);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Exact(ResourceKind),
    Classified,
    AssetOr(ResourceKind),
}

/// Extracts references from a fetched item
///
/// Pages are parsed as HTML when the content type says HTML (or says
/// nothing); stylesheets are scanned for CSS references. Anything else
/// yields an empty extraction.
pub fn extract(item: &CrawlItem, result: &FetchResult, policy: &LinkPolicy) -> Extraction {
    let content_type = result.content_type.as_deref();
    let body = String::from_utf8_lossy(&result.body);

    match item.kind {
        ResourceKind::Page if content_type.map_or(true, is_html_content_type) => {
            extract_html(&body, &result.final_url, item, policy)
        }
        ResourceKind::Css if content_type.map_or(true, is_css_content_type) => {
            extract_css(&body, &result.final_url, item, policy)
        }
        _ => Extraction::default(),
    }
}

/// Extracts page links and asset references from an HTML document
///
/// # Link Extraction Rules
///
/// **Pages:**
/// - `<a href>` and `<area href>`, except `<a download>`
/// - `<link rel="canonical" href>`
///
/// **Assets:**
/// - `<link rel="stylesheet|icon|preload|modulepreload" href>`
/// - `<script src>`
/// - `<img src|srcset>`, `<source src|srcset>`, `<video poster>`
/// - `url(...)` inside `style` attributes and `<style>` blocks
///
/// **Ignored:** `javascript:`, `mailto:`, `tel:` and `data:` links, and
/// fragment-only links. `<base href>` changes the resolution base.
///
/// Markup errors never abort extraction; they are reported as a warning and
/// whatever the parser recovered is used.
///
/// # Example
///
/// ```
/// use site_atlas::crawler::{extract_html, CrawlItem, LinkPolicy};
/// use site_atlas::url::{Origin, ResourceKind};
/// use url::Url;
///
/// let seed = Url::parse("https://example.com/").unwrap();
/// let origin = Origin::of(&seed).unwrap();
/// let policy = LinkPolicy::new(origin, 3, false, ResourceKind::asset_kinds().to_vec());
/// let html = r#"<a href="/about">About</a><img src="/logo.png">"#;
///
/// let found = extract_html(html, &seed, &CrawlItem::seed(seed.clone()), &policy);
/// assert_eq!(found.items.len(), 2);
/// ```
pub fn extract_html(html: &str, base: &Url, parent: &CrawlItem, policy: &LinkPolicy) -> Extraction {
    let document = Html::parse_document(html);
    let mut collector = Collector::new(parent, policy);

    if !document.errors.is_empty() {
        collector.out.warnings.push(format!(
            "{} markup error(s) recovered in {}",
            document.errors.len(),
            parent.url
        ));
    }

    let base = document_base(&document, base);

    for element in select(&document, "a[href], area[href]") {
        if element.value().attr("download").is_some() {
            continue;
        }
        if let Some(href) = element.value().attr("href") {
            collector.add(href, &base, Kind::Classified);
        }
    }

    for element in select(&document, "link[href]") {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(kind) = link_kind(&element) {
            collector.add(href, &base, kind);
        }
    }

    for element in select(&document, "script[src]") {
        if let Some(src) = element.value().attr("src") {
            collector.add(src, &base, Kind::Exact(ResourceKind::Js));
        }
    }

    for element in select(&document, "img, source") {
        let fallback = if element.value().name() == "img" {
            ResourceKind::Image
        } else {
            ResourceKind::Other
        };
        if let Some(src) = element.value().attr("src") {
            collector.add(src, &base, Kind::AssetOr(fallback));
        }
        if let Some(srcset) = element.value().attr("srcset") {
            for candidate in srcset_urls(srcset) {
                collector.add(candidate, &base, Kind::AssetOr(fallback));
            }
        }
    }

    for element in select(&document, "video[poster]") {
        if let Some(poster) = element.value().attr("poster") {
            collector.add(poster, &base, Kind::AssetOr(ResourceKind::Image));
        }
    }

    for element in select(&document, "[style]") {
        if let Some(style) = element.value().attr("style") {
            collector.add_css(style, &base);
        }
    }

    for element in select(&document, "style") {
        let css: String = element.text().collect();
        collector.add_css(&css, &base);
    }

    collector.out
}

/// Extracts `@import` and `url(...)` references from a stylesheet
///
/// References resolve against the stylesheet's own URL and keep the
/// stylesheet's depth.
pub fn extract_css(css: &str, base: &Url, parent: &CrawlItem, policy: &LinkPolicy) -> Extraction {
    let mut collector = Collector::new(parent, policy);
    collector.add_css(css, base);
    collector.out
}

fn select<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(selector) => document.select(&selector).collect(),
        Err(e) => {
            tracing::error!("Invalid selector {}: {:?}", selector, e);
            Vec::new()
        }
    }
}

/// The `<base href>` of a document, resolved against the response URL
fn document_base(document: &Html, base: &Url) -> Url {
    select(document, "base[href]")
        .first()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| base.join(href.trim()).ok())
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
        .unwrap_or_else(|| base.clone())
}

/// Kind of a `<link>` reference, or None for rels that are not fetched
fn link_kind(element: &ElementRef<'_>) -> Option<Kind> {
    let rel = element.value().attr("rel")?.to_ascii_lowercase();
    let rels: Vec<&str> = rel.split_ascii_whitespace().collect();

    if rels.contains(&"canonical") {
        Some(Kind::Classified)
    } else if rels.contains(&"stylesheet") {
        Some(Kind::Exact(ResourceKind::Css))
    } else if rels.iter().any(|r| r.contains("icon")) {
        Some(Kind::AssetOr(ResourceKind::Image))
    } else if rels.contains(&"preload") || rels.contains(&"modulepreload") {
        let kind = match element.value().attr("as") {
            Some("style") => ResourceKind::Css,
            Some("script") => ResourceKind::Js,
            Some("font") => ResourceKind::Font,
            Some("image") => ResourceKind::Image,
            _ if rels.contains(&"modulepreload") => ResourceKind::Js,
            _ => ResourceKind::Other,
        };
        Some(Kind::AssetOr(kind))
    } else {
        None
    }
}

/// URLs of a `srcset` attribute (descriptors dropped)
fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_ascii_whitespace().next())
}

/// Resolves a raw reference, dropping non-fetchable ones
fn resolve(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    match normalize_url(raw, Some(base)) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!("Dropping reference {:?} on {}: {}", raw, base, e);
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct CssReference<'a> {
    target: &'a str,
    import: bool,
}

fn css_url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#).ok()
    })
    .as_ref()
}

fn css_import_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)@import\s+(?:url\(\s*)?["']?([^"')\s;]+)"#).ok())
        .as_ref()
}

/// Finds `@import` targets and `url(...)` references in CSS text
///
/// An `@import url(...)` is reported once, as an import.
fn css_references(css: &str) -> Vec<CssReference<'_>> {
    let mut refs = Vec::new();
    let mut imported = HashSet::new();

    if let Some(re) = css_import_regex() {
        for caps in re.captures_iter(css) {
            if let Some(target) = caps.get(1) {
                imported.insert(target.as_str());
                refs.push(CssReference {
                    target: target.as_str(),
                    import: true,
                });
            }
        }
    }

    if let Some(re) = css_url_regex() {
        for caps in re.captures_iter(css) {
            let target = (1..=3)
                .filter_map(|i| caps.get(i))
                .map(|m| m.as_str().trim())
                .next()
                .unwrap_or("");
            if target.is_empty() || imported.contains(target) {
                continue;
            }
            refs.push(CssReference {
                target,
                import: false,
            });
        }
    }

    refs
}
