use crate::UrlError;
use url::Url;

/// URLs longer than this are rejected before and after resolution
pub const MAX_URL_LENGTH: usize = 2048;

/// Normalizes a URL according to Site-Atlas's normalization rules
///
/// The normalized form is the deduplication key of the crawl. Normalization
/// changes representation only; it never merges two distinct resources.
///
/// # Normalization Steps
///
/// 1. Trim whitespace; reject empty or overlong input
/// 2. Resolve against `base` when given (relative links), otherwise parse as absolute
/// 3. Reject anything but `http` and `https`; reject a missing host
/// 4. Host is lowercased and default ports are dropped (done by the parser)
/// 5. Dot segments are resolved (done by the parser); an empty path becomes `/`
/// 6. Percent escapes: unreserved characters are decoded, the rest use uppercase hex
/// 7. Fragment is removed
/// 8. Query pairs are stably sorted by key; empty pairs and an empty query are dropped
///
/// Trailing slashes, `www.` prefixes, the scheme and every query parameter are
/// preserved, since servers are free to treat those as distinct resources.
///
/// # Arguments
///
/// * `raw` - The URL string to normalize
/// * `base` - Base URL for resolving relative references
///
/// # Examples
///
/// ```
/// use site_atlas::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/../b?z=1&a=2#top", None).unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b?a=2&z=1");
/// ```
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Parse("empty URL".to_string()));
    }
    check_length(raw)?;

    let mut url = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    url.set_fragment(None);

    let path = normalize_percent_encoding(url.path());
    url.set_path(&path);

    if let Some(query) = url.query() {
        let query = normalize_query(query);
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&query));
        }
    }

    check_length(url.as_str())?;
    Ok(url)
}

/// Returns the deduplication key for an already-normalized URL
pub fn url_key(url: &Url) -> String {
    url.as_str().to_string()
}

fn check_length(s: &str) -> Result<(), UrlError> {
    if s.len() > MAX_URL_LENGTH {
        return Err(UrlError::TooLong {
            len: s.len(),
            max: MAX_URL_LENGTH,
        });
    }
    Ok(())
}

/// Stable-sorts query pairs by key, keeping values and repeated keys intact
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(normalize_percent_encoding)
        .collect();

    pairs.sort_by(|a, b| query_key(a).cmp(query_key(b)));
    pairs.join("&")
}

fn query_key(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(key, _)| key)
}

/// Decodes percent-escaped unreserved characters and uppercases the hex of the rest
fn normalize_percent_encoding(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi * 16 + lo;
                if is_unreserved(decoded) {
                    out.push(decoded as char);
                } else {
                    out.push('%');
                    out.push(bytes[i + 1].to_ascii_uppercase() as char);
                    out.push(bytes[i + 2].to_ascii_uppercase() as char);
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}
