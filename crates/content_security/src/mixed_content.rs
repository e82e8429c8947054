//! Mixed content blocking.

use url::Url;

use crate::config::MixedContentConfig;
use crate::content_policy::{ContentPolicy, ContentPolicyRequest, ContentPolicyType, Verdict};

/// Blocks insecure subresources of secure documents.
#[derive(Clone, Debug, Default)]
pub struct MixedContentBlocker {
    /// Whether strict blocking is enabled.
    strict_mode: bool,
    /// Whether to upgrade insecure requests.
    upgrade_insecure: bool,
}

impl MixedContentBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MixedContentConfig) -> Self {
        Self {
            strict_mode: config.strict,
            upgrade_insecure: config.upgrade_insecure,
        }
    }

    pub fn set_strict_mode(&mut self, strict: bool) {
        self.strict_mode = strict;
    }

    pub fn set_upgrade_insecure(&mut self, upgrade: bool) {
        self.upgrade_insecure = upgrade;
    }

    /// Classify a load of `resource_url` from a document at `page_url`.
    pub fn check(
        &self,
        page_url: &Url,
        resource_url: &Url,
        content_type: MixedContentType,
    ) -> MixedContentCheck {
        if page_url.scheme() != "https" || is_secure_scheme(resource_url.scheme()) {
            return MixedContentCheck::Allowed;
        }

        if self.upgrade_insecure && matches!(resource_url.scheme(), "http" | "ws") {
            return MixedContentCheck::Upgrade;
        }

        match content_type {
            MixedContentType::Passive if !self.strict_mode => MixedContentCheck::Warn,
            _ => MixedContentCheck::Blocked,
        }
    }

    /// The secure URL a load of `resource_url` from a document at
    /// `page_url` must be sent to instead, when insecure requests are
    /// upgraded.
    pub fn upgrade_target(&self, page_url: &Url, resource_url: &Url) -> Option<Url> {
        if !self.upgrade_insecure || page_url.scheme() != "https" {
            return None;
        }
        Self::upgrade_url(resource_url)
    }

    /// Upgrade an insecure URL to its secure counterpart.
    pub fn upgrade_url(url: &Url) -> Option<Url> {
        let scheme = match url.scheme() {
            "http" => "https",
            "ws" => "wss",
            _ => return None,
        };
        let mut upgraded = url.clone();
        upgraded.set_scheme(scheme).ok()?;
        Some(upgraded)
    }
}

impl ContentPolicy for MixedContentBlocker {
    fn should_load(&self, request: &ContentPolicyRequest<'_>) -> Verdict {
        let Some(page_url) = request.loading_principal.uri() else {
            return Verdict::Accept;
        };

        let content_type = MixedContentType::from_policy_type(request.policy_type);
        match self.check(page_url, request.content_location, content_type) {
            MixedContentCheck::Allowed => Verdict::Accept,
            // Channels rewrite upgradable URLs before the checks run, so an
            // insecure URL seen here was never upgraded.
            MixedContentCheck::Upgrade => {
                tracing::warn!(
                    page = %page_url,
                    url = %request.content_location,
                    "blocked insecure request that was not upgraded"
                );
                Verdict::RejectRequest
            }
            MixedContentCheck::Warn => {
                tracing::warn!(
                    page = %page_url,
                    url = %request.content_location,
                    "loading mixed (insecure) content on a secure page"
                );
                Verdict::AcceptAndNote
            }
            MixedContentCheck::Blocked => {
                tracing::warn!(
                    page = %page_url,
                    url = %request.content_location,
                    "blocked loading mixed active content"
                );
                Verdict::RejectRequest
            }
        }
    }
}

/// Type of mixed content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixedContentType {
    /// Can script or restyle the page.
    Active,
    /// Only displayed (images, media).
    Passive,
}

impl MixedContentType {
    pub fn from_policy_type(policy_type: ContentPolicyType) -> Self {
        match policy_type {
            ContentPolicyType::Image | ContentPolicyType::Imageset | ContentPolicyType::Media => {
                MixedContentType::Passive
            }
            _ => MixedContentType::Active,
        }
    }
}

/// Result of mixed content check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixedContentCheck {
    Allowed,
    Upgrade,
    Warn,
    Blocked,
}

fn is_secure_scheme(scheme: &str) -> bool {
    !matches!(scheme, "http" | "ws" | "ftp")
}
