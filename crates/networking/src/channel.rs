//! HTTP channel driven through the content security manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use content_security::{
    Channel, ContentSecurityManager, ListenerError, LoadInfo, MixedContentBlocker, ResponseHead,
    SecurityError, SecurityResult, SharedListener,
};

use crate::headers::{names, HeaderMap};

/// Channel configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum number of redirects followed for one load.
    pub max_redirects: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { max_redirects: 20 }
    }
}

/// Channel error.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Channel already opened")]
    AlreadyOpened,
    #[error("Channel was not opened through the security checks")]
    NotOpened,
    #[error("Channel cancelled")]
    Cancelled,
    #[error("Too many redirects ({0})")]
    TooManyRedirects(usize),
}

/// What happened to a response handed to the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Delivered to the listener chain.
    Delivered,
    /// A redirect that the channel followed.
    Redirected(Url),
}

/// A single load and its redirects.
pub struct HttpChannel {
    original_uri: Url,
    uri: RwLock<Url>,
    /// Set once the channel's URI replaced the original one.
    load_replace: AtomicBool,
    load_info: Option<Arc<LoadInfo>>,
    request_headers: RwLock<HeaderMap>,
    redirect_chain: RwLock<Vec<Url>>,
    listener: RwLock<Option<SharedListener>>,
    cancelled: AtomicBool,
    manager: Arc<ContentSecurityManager>,
    config: ChannelConfig,
}

impl HttpChannel {
    pub fn new(uri: Url, load_info: Arc<LoadInfo>, manager: Arc<ContentSecurityManager>) -> Self {
        Self::build(uri, Some(load_info), manager)
    }

    /// A channel created without security metadata. Opening it fails.
    pub fn without_load_info(uri: Url, manager: Arc<ContentSecurityManager>) -> Self {
        Self::build(uri, None, manager)
    }

    fn build(
        uri: Url,
        load_info: Option<Arc<LoadInfo>>,
        manager: Arc<ContentSecurityManager>,
    ) -> Self {
        Self {
            original_uri: uri.clone(),
            uri: RwLock::new(uri),
            load_replace: AtomicBool::new(false),
            load_info,
            request_headers: RwLock::new(HeaderMap::new()),
            redirect_chain: RwLock::new(Vec::new()),
            listener: RwLock::new(None),
            cancelled: AtomicBool::new(false),
            manager,
            config: ChannelConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn original_uri(&self) -> &Url {
        &self.original_uri
    }

    pub fn uri(&self) -> Url {
        self.uri.read().clone()
    }

    /// URLs this channel was redirected to, in order.
    pub fn redirect_chain(&self) -> Vec<Url> {
        self.redirect_chain.read().clone()
    }

    pub fn request_header(&self, name: &str) -> Option<String> {
        self.request_headers.read().get(name).map(str::to_string)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Open the channel. The security checks run first; on success the
    /// listener they return receives the response.
    ///
    /// A refused load cancels the channel; it can not be opened again.
    pub fn open(&self, listener: SharedListener) -> Result<(), ChannelError> {
        if self.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        if self.listener.read().is_some() {
            return Err(ChannelError::AlreadyOpened);
        }

        let current = self.uri();
        if let Some(upgraded) = self.upgrade_insecure(&current) {
            *self.uri.write() = upgraded;
            self.load_replace.store(true, Ordering::Release);
        }

        let admission = match self.manager.do_content_security_check(self, listener) {
            Ok(admission) => admission,
            Err(err) => return Err(self.cancel(err.into())),
        };
        tracing::debug!(url = %self.uri(), kind = ?admission.kind, "channel opened");
        *self.listener.write() = Some(admission.listener);
        Ok(())
    }

    /// Follow a redirect to `location`, resolved against the current URI.
    /// The redirect goes back through the security checks; a refusal
    /// cancels the channel.
    pub fn redirect_to(&self, location: &str) -> Result<Url, ChannelError> {
        if self.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        let listener = self.current_listener()?;

        let secured = self
            .load_info
            .as_ref()
            .is_some_and(|load_info| load_info.enforce_security());
        if !secured {
            return Err(ChannelError::NotOpened);
        }

        let redirects = self.redirect_chain.read().len();
        if redirects >= self.config.max_redirects {
            return Err(self.cancel(ChannelError::TooManyRedirects(redirects)));
        }

        let resolved = self.uri.read().join(location)?;
        let new_uri = self.upgrade_insecure(&resolved).unwrap_or(resolved);
        tracing::debug!(from = %self.uri(), to = %new_uri, "following redirect");
        *self.uri.write() = new_uri.clone();
        self.load_replace.store(true, Ordering::Release);
        self.redirect_chain.write().push(new_uri.clone());

        let admission = match self.manager.do_content_security_check(self, listener) {
            Ok(admission) => admission,
            Err(err) => return Err(self.cancel(err.into())),
        };
        if let Err(err) = admission.listener.on_redirect(self, &new_uri) {
            return Err(self.cancel(err.into()));
        }
        *self.listener.write() = Some(admission.listener);

        Ok(new_uri)
    }

    /// Hand a response to the channel. Redirect responses with a `Location`
    /// header are followed; anything else is delivered to the listener.
    pub fn process_response(
        &self,
        head: ResponseHead,
        body: &[Bytes],
    ) -> Result<ResponseOutcome, ChannelError> {
        if self.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        if is_redirect_status(head.status) {
            if let Some(location) = head.header(names::LOCATION) {
                return self.redirect_to(location).map(ResponseOutcome::Redirected);
            }
        }

        let listener = self.current_listener()?;
        if let Err(err) = listener.on_start_request(&head) {
            listener.on_stop_request(Err(err.clone()));
            return Err(err.into());
        }
        for chunk in body {
            if let Err(err) = listener.on_data_available(chunk) {
                listener.on_stop_request(Err(err.clone()));
                return Err(err.into());
            }
        }
        listener.on_stop_request(Ok(()));
        Ok(ResponseOutcome::Delivered)
    }

    /// The secure URL to request instead of `url`, when the security
    /// configuration upgrades insecure requests of the loading document.
    fn upgrade_insecure(&self, url: &Url) -> Option<Url> {
        let load_info = self.load_info.as_ref()?;
        let page_url = load_info.loading_principal().uri()?;
        let upgraded = MixedContentBlocker::from_config(&self.manager.config().mixed_content)
            .upgrade_target(page_url, url)?;
        tracing::debug!(from = %url, to = %upgraded, "upgrading insecure request");
        Some(upgraded)
    }

    fn current_listener(&self) -> Result<SharedListener, ChannelError> {
        self.listener.read().clone().ok_or(ChannelError::NotOpened)
    }

    fn cancel(&self, err: ChannelError) -> ChannelError {
        tracing::warn!(url = %self.uri(), error = %err, "channel cancelled");
        self.cancelled.store(true, Ordering::Release);
        if let Some(listener) = self.listener.read().clone() {
            listener.on_stop_request(Err(ListenerError::Cancelled));
        }
        err
    }
}

impl Channel for HttpChannel {
    fn load_info(&self) -> Option<Arc<LoadInfo>> {
        self.load_info.clone()
    }

    fn final_uri(&self) -> SecurityResult<Url> {
        if self.load_replace.load(Ordering::Acquire) {
            Ok(self.uri())
        } else {
            Ok(self.original_uri.clone())
        }
    }

    fn set_request_header(&self, name: &str, value: &str) {
        self.request_headers.write().insert(name, value);
    }
}

fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}
