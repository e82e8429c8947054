//! Error types for the content security gate.

use thiserror::Error;

use crate::content_policy::Verdict;

/// Terminal outcome of a failed security check.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Invalid security configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Same-origin violation: {principal} may not load {url}")]
    SameOriginViolation { principal: String, url: String },

    #[error("URI load denied: {principal} may not load {url}")]
    UriLoadDenied { principal: String, url: String },

    #[error("CORS setup failed: {0}")]
    CorsSetupFailed(String),

    #[error("Content blocked ({verdict:?}): {url}")]
    ContentBlocked { url: String, verdict: Verdict },

    #[error("Channel has no load info")]
    MissingMetadata,

    #[error("Could not resolve final channel URI: {0}")]
    TargetUnresolved(String),
}

pub type SecurityResult<T> = Result<T, SecurityError>;

impl SecurityError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn cors(msg: impl Into<String>) -> Self {
        Self::CorsSetupFailed(msg.into())
    }

    /// True for caller bugs rather than security denials.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SecurityError::ConfigurationInvalid(_) | SecurityError::MissingMetadata
        )
    }

    /// True when the load was refused by policy.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            SecurityError::SameOriginViolation { .. }
                | SecurityError::UriLoadDenied { .. }
                | SecurityError::CorsSetupFailed(_)
                | SecurityError::ContentBlocked { .. }
        )
    }
}
