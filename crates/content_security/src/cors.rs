//! Cross-Origin Resource Sharing (CORS) enforcement.
//!
//! The gate does not inspect responses itself. For CORS-mode loads it wraps
//! the caller's listener in a [`CorsListenerProxy`], which checks the
//! `Access-Control-*` headers of each response before anything reaches the
//! inner listener.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use url::Url;

use crate::channel::Channel;
use crate::error::{SecurityError, SecurityResult};
use crate::listener::{ListenerError, ResponseHead, SharedListener, StreamListener};
use crate::load_info::LoadInfo;
use crate::principal::PrincipalRef;

/// Whether `data:` responses bypass the CORS filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataUriHandling {
    Allow,
    Disallow,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CorsError {
    #[error("Could not resolve request URL: {0}")]
    NoRequestUrl(String),
    #[error("data: URLs are not allowed")]
    DataUriNotAllowed,
    #[error("CORS request to non-HTTP URL {0}")]
    UnsupportedScheme(String),
    #[error("CORS request URL contains credentials")]
    CredentialsInUrl,
    #[error("Missing Access-Control-Allow-Origin header")]
    MissingAllowOrigin,
    #[error("Multiple Access-Control-Allow-Origin values")]
    MultipleAllowOrigin,
    #[error("Access-Control-Allow-Origin {allowed} does not match {origin}")]
    OriginMismatch { allowed: String, origin: String },
    #[error("Wildcard Access-Control-Allow-Origin not allowed with credentials")]
    WildcardWithCredentials,
    #[error("Credentials not allowed")]
    CredentialsNotAllowed,
}

/// CORS-relevant response headers.
#[derive(Clone, Debug, Default)]
pub struct CorsResponse {
    /// Access-Control-Allow-Origin.
    pub allow_origin: Option<String>,
    /// Access-Control-Allow-Credentials.
    pub allow_credentials: bool,
    /// Access-Control-Expose-Headers.
    pub expose_headers: Vec<String>,
}

impl CorsResponse {
    pub fn from_headers(headers: &[(String, String)]) -> Self {
        let mut response = Self::default();

        for (name, value) in headers {
            match name.to_lowercase().as_str() {
                "access-control-allow-origin" => {
                    response.allow_origin = Some(value.trim().to_string());
                }
                "access-control-allow-credentials" => {
                    response.allow_credentials = value.trim() == "true";
                }
                "access-control-expose-headers" => {
                    response.expose_headers =
                        value.split(',').map(|s| s.trim().to_string()).collect();
                }
                _ => {}
            }
        }

        response
    }

    /// Check the response against the serialized request origin.
    pub fn check(&self, origin: &str, with_credentials: bool) -> Result<(), CorsError> {
        let allowed = self
            .allow_origin
            .as_deref()
            .ok_or(CorsError::MissingAllowOrigin)?;

        if allowed.contains(',') {
            return Err(CorsError::MultipleAllowOrigin);
        }

        if allowed == "*" {
            if with_credentials {
                return Err(CorsError::WildcardWithCredentials);
            }
        } else if allowed != origin {
            return Err(CorsError::OriginMismatch {
                allowed: allowed.to_string(),
                origin: origin.to_string(),
            });
        }

        if with_credentials && !self.allow_credentials {
            return Err(CorsError::CredentialsNotAllowed);
        }

        Ok(())
    }
}

/// A listener filter that enforces CORS on the responses of one load.
pub trait CorsFilter: StreamListener {
    /// Bind the filter to the channel it will guard.
    fn init(&self, channel: &dyn Channel, data_uris: DataUriHandling) -> Result<(), CorsError>;

    fn into_listener(self: Arc<Self>) -> SharedListener;
}

/// Builds CORS filters around a listener.
pub trait CorsFilterFactory: Send + Sync {
    fn create(
        &self,
        inner: SharedListener,
        principal: PrincipalRef,
        with_credentials: bool,
    ) -> Arc<dyn CorsFilter>;
}

#[derive(Debug)]
struct CorsState {
    data_uris: DataUriHandling,
    request_url: Option<Url>,
    cross_origin: bool,
    /// Set once the load was redirected across origins; the request origin
    /// is `null` from then on.
    tainted: bool,
    failure: Option<CorsError>,
}

/// Default [`CorsFilter`].
pub struct CorsListenerProxy {
    inner: SharedListener,
    principal: PrincipalRef,
    with_credentials: bool,
    state: Mutex<CorsState>,
}

impl CorsListenerProxy {
    pub fn new(inner: SharedListener, principal: PrincipalRef, with_credentials: bool) -> Self {
        Self {
            inner,
            principal,
            with_credentials,
            state: Mutex::new(CorsState {
                data_uris: DataUriHandling::Disallow,
                request_url: None,
                cross_origin: false,
                tainted: false,
                failure: None,
            }),
        }
    }

    /// Whether the current request URL is cross-origin.
    pub fn is_cross_origin(&self) -> bool {
        self.state.lock().cross_origin
    }

    /// The origin that responses are checked against.
    pub fn request_origin(&self) -> String {
        if self.state.lock().tainted {
            "null".to_string()
        } else {
            self.principal.origin_header()
        }
    }

    fn update_channel(&self, channel: &dyn Channel, url: &Url) -> Result<(), CorsError> {
        let mut state = self.state.lock();
        state.request_url = Some(url.clone());

        if url.scheme() == "data" {
            state.cross_origin = false;
            return match state.data_uris {
                DataUriHandling::Allow => Ok(()),
                DataUriHandling::Disallow => Err(CorsError::DataUriNotAllowed),
            };
        }

        if !state.tainted
            && (self.principal.is_system() || self.principal.is_same_origin_with_url(url))
        {
            state.cross_origin = false;
            return Ok(());
        }

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CorsError::UnsupportedScheme(url.to_string()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(CorsError::CredentialsInUrl);
        }

        state.cross_origin = true;
        let origin = if state.tainted {
            "null".to_string()
        } else {
            self.principal.origin_header()
        };
        drop(state);

        tracing::debug!(url = %url, origin = %origin, "cross-origin request requires CORS");
        channel.set_request_header("Origin", &origin);
        Ok(())
    }

    fn fail(&self, err: CorsError) -> ListenerError {
        tracing::warn!(error = %err, "CORS check failed");
        self.state.lock().failure = Some(err.clone());
        ListenerError::Cors(err)
    }
}

impl CorsFilter for CorsListenerProxy {
    fn init(&self, channel: &dyn Channel, data_uris: DataUriHandling) -> Result<(), CorsError> {
        let url = channel
            .final_uri()
            .map_err(|e| CorsError::NoRequestUrl(e.to_string()))?;
        self.state.lock().data_uris = data_uris;
        self.update_channel(channel, &url)
    }

    fn into_listener(self: Arc<Self>) -> SharedListener {
        self
    }
}

impl StreamListener for CorsListenerProxy {
    fn on_start_request(&self, response: &ResponseHead) -> Result<(), ListenerError> {
        let (cross_origin, failure) = {
            let state = self.state.lock();
            (state.cross_origin, state.failure.clone())
        };
        if let Some(err) = failure {
            return Err(ListenerError::Cors(err));
        }

        if cross_origin {
            let cors = CorsResponse::from_headers(&response.headers);
            if let Err(err) = cors.check(&self.request_origin(), self.with_credentials) {
                return Err(self.fail(err));
            }
        }

        self.inner.on_start_request(response)
    }

    fn on_data_available(&self, data: &[u8]) -> Result<(), ListenerError> {
        if let Some(err) = self.state.lock().failure.clone() {
            return Err(ListenerError::Cors(err));
        }
        tracing::trace!(bytes = data.len(), "forwarding response data");
        self.inner.on_data_available(data)
    }

    fn on_stop_request(&self, status: Result<(), ListenerError>) {
        let failure = self.state.lock().failure.clone();
        match failure {
            Some(err) => self.inner.on_stop_request(Err(ListenerError::Cors(err))),
            None => self.inner.on_stop_request(status),
        }
    }

    fn on_redirect(&self, channel: &dyn Channel, new_url: &Url) -> Result<(), ListenerError> {
        {
            // A hop between two origins, neither being the requester's,
            // taints the request origin.
            let mut state = self.state.lock();
            let taints = state.request_url.as_ref().is_some_and(|previous| {
                previous.origin() != new_url.origin()
                    && !self.principal.is_system()
                    && !self.principal.is_same_origin_with_url(previous)
            });
            if taints {
                state.tainted = true;
            }
        }

        if let Err(err) = self.update_channel(channel, new_url) {
            return Err(self.fail(err));
        }
        self.inner.on_redirect(channel, new_url)
    }
}

/// Factory for [`CorsListenerProxy`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CorsListenerFactory;

impl CorsFilterFactory for CorsListenerFactory {
    fn create(
        &self,
        inner: SharedListener,
        principal: PrincipalRef,
        with_credentials: bool,
    ) -> Arc<dyn CorsFilter> {
        Arc::new(CorsListenerProxy::new(inner, principal, with_credentials))
    }
}

/// Wrap `listener` in a CORS filter when the load requires CORS, returning
/// the listener the channel must deliver to.
pub fn do_cors_checks(
    channel: &dyn Channel,
    load_info: &LoadInfo,
    listener: SharedListener,
    factory: &dyn CorsFilterFactory,
) -> SecurityResult<SharedListener> {
    if !load_info.security_mode().requires_cors() {
        return Ok(listener);
    }

    let filter = factory.create(
        listener,
        Arc::clone(load_info.loading_principal()),
        load_info.require_cors_with_credentials(),
    );
    filter.init(channel, DataUriHandling::Allow).map_err(|err| {
        tracing::warn!(error = %err, "CORS setup failed");
        SecurityError::cors(err.to_string())
    })?;

    Ok(filter.into_listener())
}
