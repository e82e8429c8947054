//! The transport seen from the security gate.

use std::sync::Arc;

use url::Url;

use crate::error::SecurityResult;
use crate::load_info::LoadInfo;

/// A load in flight. Implemented by the networking layer.
pub trait Channel: Send + Sync {
    /// Security metadata of the load; `None` is a caller bug.
    fn load_info(&self) -> Option<Arc<LoadInfo>>;

    /// The URL the load finally resolves to.
    fn final_uri(&self) -> SecurityResult<Url>;

    fn set_request_header(&self, name: &str, value: &str);
}
