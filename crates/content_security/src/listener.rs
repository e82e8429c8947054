//! Response listener chain.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::channel::Channel;
use crate::cors::CorsError;

/// Status line and headers of a response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(url: Url, status: u16) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ListenerError {
    #[error("CORS check failed: {0}")]
    Cors(#[from] CorsError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Listener error: {0}")]
    Other(String),
}

/// Receives the response of a load. Filters wrap an inner listener and
/// decide what reaches it.
pub trait StreamListener: Send + Sync {
    fn on_start_request(&self, response: &ResponseHead) -> Result<(), ListenerError>;

    fn on_data_available(&self, data: &[u8]) -> Result<(), ListenerError>;

    fn on_stop_request(&self, status: Result<(), ListenerError>);

    /// Called after the channel followed a redirect to `new_url`.
    fn on_redirect(&self, _channel: &dyn Channel, _new_url: &Url) -> Result<(), ListenerError> {
        Ok(())
    }
}

pub type SharedListener = Arc<dyn StreamListener>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let head = ResponseHead::new(Url::parse("https://example.com/").unwrap(), 200)
            .with_header("Access-Control-Allow-Origin", "*")
            .with_header("access-control-allow-origin", "https://second.com");

        assert_eq!(head.header("ACCESS-CONTROL-ALLOW-ORIGIN"), Some("*"));
        assert_eq!(head.header("content-type"), None);
    }
}
