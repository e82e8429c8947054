//! The content security manager: the admit/deny gate every load and every
//! redirect of a load passes through.
//!
//! Checks, in order:
//! 1. Same-origin policy, when the load requires it. Runs on redirects too.
//! 2. URI load permission of the loading and triggering principals, for
//!    cross-origin loads.
//! 3. CORS setup, for CORS loads. The caller's listener may come back
//!    wrapped in a CORS filter.
//! 4. Content policies (mixed content and friends).
//!
//! Steps 2 to 4 run once per load; a redirect only re-checks step 1.

use std::sync::Arc;

use url::Url;

use crate::channel::Channel;
use crate::config::SecurityConfig;
use crate::content_policy::{do_content_security_checks, ContentPolicy, ContentPolicyService};
use crate::cors::{do_cors_checks, CorsFilterFactory, CorsListenerFactory};
use crate::error::{SecurityError, SecurityResult};
use crate::listener::SharedListener;
use crate::load_info::{validate_security_flags, CheckState, LoadInfo};
use crate::mixed_content::MixedContentBlocker;
use crate::uri_permission::{do_check_load_uri_checks, SchemeSecurityManager, UriLoadPermission};

/// Which evaluation of a load admitted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckKind {
    /// First evaluation; every check ran.
    Initial,
    /// A redirect; only the same-origin check ran.
    Redirect,
}

/// An admitted load.
pub struct Admission {
    /// The listener the channel must deliver the response to.
    pub listener: SharedListener,
    pub kind: CheckKind,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission").field("kind", &self.kind).finish()
    }
}

pub struct ContentSecurityManager {
    config: SecurityConfig,
    uri_permission: Arc<dyn UriLoadPermission>,
    cors_factory: Arc<dyn CorsFilterFactory>,
    content_policy: Arc<dyn ContentPolicy>,
}

impl ContentSecurityManager {
    /// Manager with the default collaborators: scheme-based URI
    /// permissions, the CORS listener proxy, and a policy service holding
    /// the mixed content blocker.
    pub fn new(config: SecurityConfig) -> Self {
        let service = ContentPolicyService::new();
        service.register(Arc::new(MixedContentBlocker::from_config(&config.mixed_content)));

        Self {
            config,
            uri_permission: Arc::new(SchemeSecurityManager::new()),
            cors_factory: Arc::new(CorsListenerFactory),
            content_policy: Arc::new(service),
        }
    }

    pub fn with_uri_permission(mut self, uri_permission: Arc<dyn UriLoadPermission>) -> Self {
        self.uri_permission = uri_permission;
        self
    }

    pub fn with_cors_factory(mut self, cors_factory: Arc<dyn CorsFilterFactory>) -> Self {
        self.cors_factory = cors_factory;
        self
    }

    pub fn with_content_policy(mut self, content_policy: Arc<dyn ContentPolicy>) -> Self {
        self.content_policy = content_policy;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Run the security checks for `channel`.
    ///
    /// `listener` is the listener the caller would deliver the response to.
    /// On success the returned [`Admission`] carries the listener to use
    /// instead, which is `listener` itself unless a CORS filter was added.
    pub fn do_content_security_check(
        &self,
        channel: &dyn Channel,
        listener: SharedListener,
    ) -> SecurityResult<Admission> {
        let load_info = channel.load_info().ok_or_else(|| {
            tracing::error!("channel needs load info to perform security checks");
            SecurityError::MissingMetadata
        })?;

        validate_security_flags(&load_info)?;

        // Flip the flags before anything else so a concurrent evaluation of
        // the same load is treated as a redirect.
        let kind = match load_info.begin_security_check() {
            CheckState::NotChecked => CheckKind::Initial,
            CheckState::Checked => CheckKind::Redirect,
        };

        let target = channel.final_uri()?;
        tracing::debug!(
            url = %target,
            mode = ?load_info.security_mode(),
            ?kind,
            "performing content security checks"
        );

        self.do_sop_checks(&target, &load_info)?;

        if kind == CheckKind::Redirect {
            return Ok(Admission { listener, kind });
        }

        do_check_load_uri_checks(&target, &load_info, self.uri_permission.as_ref())?;
        let listener = do_cors_checks(channel, &load_info, listener, self.cors_factory.as_ref())?;
        do_content_security_checks(
            &target,
            &load_info,
            self.content_policy.as_ref(),
            self.config.unsupported_content_types,
        )?;

        tracing::debug!(url = %target, "all content security checks passed");
        Ok(Admission { listener, kind })
    }

    fn do_sop_checks(&self, target: &Url, load_info: &LoadInfo) -> SecurityResult<()> {
        let mode = load_info.security_mode();
        if !mode.requires_same_origin() {
            return Ok(());
        }

        let principal = load_info.loading_principal();
        if principal.check_may_load(target, self.config.report_sop_violations, mode.data_inherits()) {
            Ok(())
        } else {
            Err(SecurityError::SameOriginViolation {
                principal: principal.to_string(),
                url: target.to_string(),
            })
        }
    }
}

impl Default for ContentSecurityManager {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}
