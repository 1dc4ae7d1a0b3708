use serde::Serialize;
use std::fmt;
use url::Url;

/// A web origin: scheme, host and port
///
/// Throttling state and same-origin checks are keyed by origin, so
/// `http://example.com` and `https://example.com:8443` are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    /// Extracts the origin of a URL
    ///
    /// Returns None for URLs without a host or a known port (non-http schemes).
    ///
    /// # Examples
    ///
    /// ```
    /// use url::Url;
    /// use site_atlas::url::Origin;
    ///
    /// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
    /// let origin = Origin::of(&url).unwrap();
    /// assert_eq!(origin.to_string(), "https://example.com");
    /// assert_eq!(origin.port(), 443);
    /// ```
    pub fn of(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_lowercase();
        let port = url.port_or_known_default()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns true if the URL belongs to this origin
    pub fn contains(&self, url: &Url) -> bool {
        Self::of(url).as_ref() == Some(self)
    }

    fn has_default_port(&self) -> bool {
        matches!(
            (self.scheme.as_str(), self.port),
            ("http", 80) | ("https", 443)
        )
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_default_port() {
            write!(f, "{}://{}", self.scheme, self.host)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}
