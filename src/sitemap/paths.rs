//! Local path derivation
//!
//! A local path is a pure function of the normalized URL and its kind:
//!
//! | Item | Local path |
//! |------|------------|
//! | `https://site/` | `index.html` |
//! | `https://site/docs/` | `docs/index.html` |
//! | `https://site/docs/intro` | `docs/intro.html` |
//! | `https://site/list?page=2` | `list_q1a2b3c4d.html` |
//! | `https://site/static/site.css` | `assets/css/site.css` |
//! | page on another origin | `external/<host>/...` |
//!
//! Distinct URLs can still map to the same path (two `logo.png` in different
//! directories); the site map builder resolves those with a content hash.

use crate::url::{Origin, ResourceKind};
use sha2::{Digest, Sha256};
use url::Url;

/// Folder under `assets/` for each asset kind
pub fn asset_folder(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Css => "css",
        ResourceKind::Js => "js",
        ResourceKind::Image => "images",
        ResourceKind::Font => "fonts",
        ResourceKind::Other | ResourceKind::Page => "other",
    }
}

/// Derives the local path for a URL
///
/// `seed` decides which pages live at the top level; pages on other origins
/// go under `external/`.
pub fn local_path_for(url: &Url, kind: ResourceKind, seed: &Origin) -> String {
    if kind.is_asset() {
        return asset_path(url, kind);
    }

    let mut path = String::new();
    if !seed.contains(url) {
        path.push_str("external/");
        path.push_str(&origin_dir(url));
        path.push('/');
    }
    path.push_str(&page_path(url));
    path
}

fn origin_dir(url: &Url) -> String {
    let host = sanitize_segment(url.host_str().unwrap_or("unknown"));
    match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host,
    }
}

fn page_path(url: &Url) -> String {
    let segments: Vec<String> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize_segment)
        .collect();
    let directory_like = url.path().ends_with('/') || segments.is_empty();

    let (dirs, file_stem) = if directory_like {
        (segments.as_slice(), "index".to_string())
    } else {
        let (last, dirs) = match segments.split_last() {
            Some(split) => split,
            None => return "index.html".to_string(),
        };
        let stem = last
            .strip_suffix(".html")
            .or_else(|| last.strip_suffix(".htm"))
            .unwrap_or(last.as_str())
            .to_string();
        (dirs, stem)
    };

    let mut file_name = file_stem;
    if let Some(query) = url.query() {
        file_name.push_str(&query_suffix(query));
    }
    file_name.push_str(".html");

    let mut parts: Vec<&str> = dirs.iter().map(String::as_str).collect();
    parts.push(&file_name);
    parts.join("/")
}

fn asset_path(url: &Url, kind: ResourceKind) -> String {
    let last = url
        .path()
        .rsplit('/')
        .find(|s| !s.is_empty())
        .map(sanitize_segment)
        .unwrap_or_else(|| "asset".to_string());

    let file_name = match url.query() {
        Some(query) => {
            let suffix = query_suffix(query);
            match last.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => format!("{}{}.{}", stem, suffix, ext),
                _ => format!("{}{}", last, suffix),
            }
        }
        None => last,
    };

    format!("assets/{}/{}", asset_folder(kind), file_name)
}

fn query_suffix(query: &str) -> String {
    format!("_q{}", short_hash(query.as_bytes()))
}

/// First 8 hex characters of the SHA-256 of `bytes`
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    digest[..8].to_string()
}

/// Inserts `-suffix` before the file extension of `path`
pub fn with_suffix(path: &str, suffix: &str) -> String {
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", file, suffix),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, file),
        None => file,
    }
}

/// Keeps ASCII alphanumerics and `.-_`; everything else becomes `_`
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}
