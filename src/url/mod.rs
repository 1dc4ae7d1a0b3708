//! URL handling module for Site-Atlas
//!
//! This module provides URL normalization (the crawl's deduplication key),
//! origin extraction for throttling and same-origin checks, and resource
//! classification (page versus asset kind).

mod classify;
mod normalize;
mod origin;

// Re-export main functions
pub use classify::{
    classify, extension, is_css_content_type, is_html_content_type, kind_for_content_type,
    refine_kind, ResourceKind,
};
pub use normalize::{normalize_url, url_key, MAX_URL_LENGTH};
pub use origin::Origin;
