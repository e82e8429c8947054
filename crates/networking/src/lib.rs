//! Networking layer for the browser.
//!
//! This crate handles:
//! - Opening channels through the content security checks
//! - Following redirects, each re-checked by the security manager
//! - Delivering responses to the (possibly CORS-filtered) listener chain

pub mod channel;
pub mod headers;

pub use channel::{ChannelConfig, ChannelError, HttpChannel, ResponseOutcome};
pub use headers::HeaderMap;
