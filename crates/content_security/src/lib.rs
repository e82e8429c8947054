//! Content security checks for resource loads.
//!
//! This crate decides whether a load may proceed:
//! - Same-Origin Policy (SOP)
//! - Per-principal URI load permissions
//! - Cross-Origin Resource Sharing (CORS)
//! - Content policies such as mixed content blocking
//!
//! [`ContentSecurityManager`] runs the checks when a channel is opened and
//! again, reduced to the same-origin check, on every redirect.

pub mod channel;
pub mod config;
pub mod content_policy;
pub mod cors;
pub mod error;
pub mod listener;
pub mod load_info;
pub mod manager;
pub mod mixed_content;
pub mod principal;
pub mod uri_permission;

#[cfg(test)]
mod testing;

pub use channel::Channel;
pub use config::{ConfigError, MixedContentConfig, SecurityConfig, UnsupportedContentTypes};
pub use content_policy::{
    ContentPolicy, ContentPolicyRequest, ContentPolicyService, ContentPolicyType,
    InternalContentPolicyType, Verdict,
};
pub use cors::{CorsError, CorsFilter, CorsFilterFactory, CorsListenerProxy, DataUriHandling};
pub use error::{SecurityError, SecurityResult};
pub use listener::{ListenerError, ResponseHead, SharedListener, StreamListener};
pub use load_info::{CheckState, LoadInfo, LoadInfoBuilder, Node, NodeType, SecurityFlags, SecurityMode};
pub use manager::{Admission, CheckKind, ContentSecurityManager};
pub use mixed_content::MixedContentBlocker;
pub use principal::{Origin, Principal, PrincipalRef};
pub use uri_permission::{SchemeSecurityManager, Strictness, UriDenied, UriLoadPermission};
