//! Principals and the same-origin relation between them and URLs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use url::Url;

/// Shared handle to a principal. Identity of the handle matters: the gate
/// compares loading and triggering principals with `Arc::ptr_eq`.
pub type PrincipalRef = Arc<Principal>;

/// Represents an origin (scheme, host, port tuple).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Origin {
    /// Tuple origin of a URL, `None` for schemes with opaque origins.
    pub fn from_url(url: &Url) -> Option<Self> {
        let scheme = url.scheme().to_lowercase();
        if matches!(
            scheme.as_str(),
            "data" | "file" | "blob" | "javascript" | "about"
        ) {
            return None;
        }

        let host = url.host_str()?.to_lowercase();
        Some(Self {
            scheme,
            host,
            port: url.port_or_known_default(),
        })
    }

    pub fn parse(url_str: &str) -> Option<Self> {
        let url = Url::parse(url_str).ok()?;
        Self::from_url(&url)
    }

    pub fn is_same_origin(&self, other: &Origin) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.effective_port() == other.effective_port()
    }

    /// Get the effective port (using default ports for known schemes).
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| match self.scheme.as_str() {
            "http" | "ws" => 80,
            "https" | "wss" => 443,
            "ftp" => 21,
            _ => 0,
        })
    }

    /// ASCII serialization, as sent in the `Origin` request header.
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default_port = match self.scheme.as_str() {
            "http" | "ws" => Some(80),
            "https" | "wss" => Some(443),
            _ => None,
        };

        match self.port {
            Some(port) if Some(port) != default_port => {
                write!(f, "{}://{}:{}", self.scheme, self.host, port)
            }
            _ => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// Security identity of a document or script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// Browser-internal code; subsumes every other principal.
    System,
    /// Content loaded from a URL.
    Content {
        uri: Url,
        /// `None` for URLs without a tuple origin (e.g. `file:`).
        origin: Option<Origin>,
    },
    /// A unique opaque identity, same-origin with nothing but itself.
    Null(u64),
}

impl Principal {
    /// The system principal.
    pub fn system() -> PrincipalRef {
        Arc::new(Principal::System)
    }

    /// A fresh null principal.
    pub fn null() -> PrincipalRef {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Arc::new(Principal::Null(COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    /// Principal for content loaded from `uri`. URLs that inherit their
    /// security context (such as `data:`) produce a fresh null principal.
    pub fn content(uri: &Url) -> PrincipalRef {
        if inherits_security_context(uri) {
            return Principal::null();
        }
        Arc::new(Principal::Content {
            uri: uri.clone(),
            origin: Origin::from_url(uri),
        })
    }

    /// Parse a URL and build a content principal.
    pub fn from_url_str(url: &str) -> Result<PrincipalRef, url::ParseError> {
        Ok(Principal::content(&Url::parse(url)?))
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Principal::System)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Principal::Null(_))
    }

    pub fn uri(&self) -> Option<&Url> {
        match self {
            Principal::Content { uri, .. } => Some(uri),
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Principal::Content { origin, .. } => origin.as_ref(),
            _ => None,
        }
    }

    /// Value for the `Origin` request header.
    pub fn origin_header(&self) -> String {
        self.origin()
            .map(Origin::serialize)
            .unwrap_or_else(|| "null".to_string())
    }

    /// Whether `url` is same-origin with this principal.
    pub fn is_same_origin_with_url(&self, url: &Url) -> bool {
        match self {
            Principal::Content {
                origin: Some(origin),
                ..
            } => Origin::from_url(url).is_some_and(|other| origin.is_same_origin(&other)),
            // Each file is its own origin.
            Principal::Content { uri, origin: None } => {
                uri.scheme() == url.scheme() && strip_fragment(uri) == strip_fragment(url)
            }
            Principal::System | Principal::Null(_) => false,
        }
    }

    /// Whether this principal may load `url`.
    ///
    /// `allow_if_inherits` lets URLs that inherit the loader's security
    /// context (`data:`, `javascript:`, `about:blank`) through. When `report`
    /// is set a refusal is logged as a security error.
    pub fn check_may_load(&self, url: &Url, report: bool, allow_if_inherits: bool) -> bool {
        if self.is_system() {
            return true;
        }
        if allow_if_inherits && inherits_security_context(url) {
            return true;
        }
        if self.is_same_origin_with_url(url) {
            return true;
        }

        if report {
            tracing::warn!(
                principal = %self,
                url = %url,
                "Security Error: content may not load data from a different origin"
            );
        }
        false
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::System => write!(f, "[System Principal]"),
            Principal::Content {
                origin: Some(origin),
                ..
            } => write!(f, "{}", origin),
            Principal::Content { uri, origin: None } => write!(f, "{}", uri),
            Principal::Null(id) => write!(f, "[Null Principal #{}]", id),
        }
    }
}

/// URLs whose documents take on the security context of whoever loads them.
pub fn inherits_security_context(url: &Url) -> bool {
    match url.scheme() {
        "data" | "javascript" => true,
        "about" => matches!(url.path(), "blank" | "srcdoc"),
        _ => false,
    }
}

fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_origin_with_port() {
        let origin1 = Origin::parse("https://example.com:443/path").unwrap();
        let origin2 = Origin::parse("https://example.com/path").unwrap();
        let origin3 = Origin::parse("https://example.com:8443/path").unwrap();

        assert!(origin1.is_same_origin(&origin2));
        assert!(!origin1.is_same_origin(&origin3));
        assert_eq!(origin3.serialize(), "https://example.com:8443");
        assert_eq!(origin1.serialize(), "https://example.com");
    }

    #[test]
    fn test_opaque_schemes_have_no_origin() {
        assert!(Origin::parse("data:text/plain,hi").is_none());
        assert!(Origin::parse("about:blank").is_none());
        assert!(Origin::parse("file:///tmp/a.html").is_none());
    }

    #[test]
    fn test_content_principal_same_origin() {
        let principal = Principal::from_url_str("https://example.com/index.html").unwrap();
        assert!(principal.is_same_origin_with_url(&url("https://example.com/api")));
        assert!(!principal.is_same_origin_with_url(&url("http://example.com/api")));
        assert!(!principal.is_same_origin_with_url(&url("https://other.com/")));
        assert_eq!(principal.origin_header(), "https://example.com");
    }

    #[test]
    fn test_data_url_yields_null_principal() {
        let principal = Principal::content(&url("data:text/html,<p>hi</p>"));
        assert!(principal.is_null());
        assert_eq!(principal.origin_header(), "null");
    }

    #[test]
    fn test_file_principal_is_per_file() {
        let principal = Principal::from_url_str("file:///home/a.html").unwrap();
        assert!(principal.is_same_origin_with_url(&url("file:///home/a.html#x")));
        assert!(!principal.is_same_origin_with_url(&url("file:///home/b.html")));
    }

    #[test]
    fn test_check_may_load_inheritance() {
        let principal = Principal::from_url_str("https://example.com/").unwrap();
        let data = url("data:text/plain,hello");

        assert!(principal.check_may_load(&data, false, true));
        assert!(!principal.check_may_load(&data, false, false));
        assert!(principal.check_may_load(&url("about:blank"), false, true));
        assert!(!principal.check_may_load(&url("about:config"), false, true));
    }

    #[test]
    fn test_check_may_load_cross_origin() {
        let principal = Principal::from_url_str("https://example.com/").unwrap();
        assert!(principal.check_may_load(&url("https://example.com/a.png"), true, false));
        assert!(!principal.check_may_load(&url("https://evil.com/a.png"), true, true));
    }

    #[test]
    fn test_system_and_null_principals() {
        let system = Principal::system();
        let null = Principal::null();
        let target = url("https://example.com/");

        assert!(system.check_may_load(&target, false, false));
        assert!(!null.check_may_load(&target, false, false));
        assert!(null.check_may_load(&url("data:,x"), false, true));
        assert_ne!(*null, *Principal::null());
    }
}
