use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// What a URL points at: a page, or one of the asset kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// HTML document; its links deepen the page tree
    Page,
    /// Stylesheet
    Css,
    /// Script
    Js,
    Image,
    Font,
    /// Any other downloadable file (documents, archives, media)
    Other,
}

impl ResourceKind {
    pub fn is_page(&self) -> bool {
        matches!(self, Self::Page)
    }

    pub fn is_asset(&self) -> bool {
        !self.is_page()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Css => "css",
            Self::Js => "js",
            Self::Image => "image",
            Self::Font => "font",
            Self::Other => "other",
        }
    }

    /// All asset kinds, in display order
    pub fn asset_kinds() -> [Self; 5] {
        [Self::Css, Self::Js, Self::Image, Self::Font, Self::Other]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PAGE_EXTENSIONS: &[&str] = &[
    "html", "htm", "xhtml", "shtml", "php", "asp", "aspx", "jsp", "cfm",
];
const JS_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", "tif", "tiff",
];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];
const OTHER_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "gz", "tgz", "tar", "rar", "7z", "mp3", "mp4", "webm", "ogg", "wav", "mov",
    "avi", "json", "xml", "txt", "csv", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "map",
    "wasm", "rss", "atom",
];

/// Classifies a URL by the extension of its last path segment
///
/// URLs without an extension, with a trailing slash, or with an unknown
/// extension are treated as pages. An asset kind found here may still be
/// revised by [`refine_kind`] once the response's content type is known.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use site_atlas::url::{classify, ResourceKind};
///
/// let url = Url::parse("https://example.com/static/site.CSS?v=3").unwrap();
/// assert_eq!(classify(&url), ResourceKind::Css);
///
/// let url = Url::parse("https://example.com/about/").unwrap();
/// assert_eq!(classify(&url), ResourceKind::Page);
/// ```
pub fn classify(url: &Url) -> ResourceKind {
    match extension(url) {
        Some(ext) => kind_for_extension(&ext),
        None => ResourceKind::Page,
    }
}

/// Lowercased extension of the last path segment, if any
pub fn extension(url: &Url) -> Option<String> {
    let segment = url.path().rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn kind_for_extension(ext: &str) -> ResourceKind {
    if PAGE_EXTENSIONS.contains(&ext) {
        ResourceKind::Page
    } else if ext == "css" {
        ResourceKind::Css
    } else if JS_EXTENSIONS.contains(&ext) {
        ResourceKind::Js
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        ResourceKind::Image
    } else if FONT_EXTENSIONS.contains(&ext) {
        ResourceKind::Font
    } else if OTHER_EXTENSIONS.contains(&ext) {
        ResourceKind::Other
    } else {
        ResourceKind::Page
    }
}

/// Maps a Content-Type header value to an asset kind
pub fn kind_for_content_type(content_type: &str) -> Option<ResourceKind> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime == "text/css" {
        Some(ResourceKind::Css)
    } else if mime.contains("javascript") || mime.contains("ecmascript") {
        Some(ResourceKind::Js)
    } else if mime.starts_with("image/") {
        Some(ResourceKind::Image)
    } else if mime.starts_with("font/")
        || mime.contains("font-woff")
        || mime == "application/vnd.ms-fontobject"
        || mime == "application/x-font-ttf"
    {
        Some(ResourceKind::Font)
    } else {
        None
    }
}

/// Revises an asset's kind after fetch using its content type
///
/// Only ambiguous assets (`Other`) are revised; a page stays a page and an
/// extension- or markup-derived asset kind is kept.
pub fn refine_kind(kind: ResourceKind, content_type: Option<&str>) -> ResourceKind {
    if kind != ResourceKind::Other {
        return kind;
    }
    content_type
        .and_then(kind_for_content_type)
        .unwrap_or(kind)
}

/// Returns true if a content type denotes an HTML document
pub fn is_html_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/html") || ct.contains("application/xhtml")
}

/// Returns true if a content type denotes a stylesheet
pub fn is_css_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/css")
}
