//! Per-load security metadata.
//!
//! A [`LoadInfo`] is created when a load starts and travels with it through
//! every redirect. Apart from its two monotonic check flags it is immutable.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::content_policy::{ContentPolicyType, InternalContentPolicyType};
use crate::error::{SecurityError, SecurityResult};
use crate::principal::PrincipalRef;

pub const SEC_REQUIRE_SAME_ORIGIN_DATA_INHERITS: u32 = 1 << 0;
pub const SEC_REQUIRE_SAME_ORIGIN_DATA_IS_BLOCKED: u32 = 1 << 1;
pub const SEC_ALLOW_CROSS_ORIGIN_DATA_INHERITS: u32 = 1 << 2;
pub const SEC_ALLOW_CROSS_ORIGIN_DATA_IS_NULL: u32 = 1 << 3;
pub const SEC_REQUIRE_CORS_DATA_INHERITS: u32 = 1 << 4;
pub const SEC_REQUIRE_CORS_WITH_CREDENTIALS: u32 = 1 << 5;

const SEC_MODE_MASK: u32 = SEC_REQUIRE_SAME_ORIGIN_DATA_INHERITS
    | SEC_REQUIRE_SAME_ORIGIN_DATA_IS_BLOCKED
    | SEC_ALLOW_CROSS_ORIGIN_DATA_INHERITS
    | SEC_ALLOW_CROSS_ORIGIN_DATA_IS_NULL
    | SEC_REQUIRE_CORS_DATA_INHERITS;

/// How a load relates to the origin of its loading principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// Same-origin only; `data:` targets inherit the loader's origin.
    RequireSameOriginDataInherits,
    /// Same-origin only; `data:` targets are blocked.
    RequireSameOriginDataBlocked,
    /// Cross-origin allowed; `data:` targets inherit the loader's origin.
    AllowCrossOriginDataInherits,
    /// Cross-origin allowed; `data:` targets get a null principal.
    AllowCrossOriginDataNull,
    /// Cross-origin loads must pass CORS.
    RequireCorsDataInherits,
}

impl SecurityMode {
    pub const ALL: [SecurityMode; 5] = [
        SecurityMode::RequireSameOriginDataInherits,
        SecurityMode::RequireSameOriginDataBlocked,
        SecurityMode::AllowCrossOriginDataInherits,
        SecurityMode::AllowCrossOriginDataNull,
        SecurityMode::RequireCorsDataInherits,
    ];

    pub fn requires_same_origin(&self) -> bool {
        matches!(
            self,
            SecurityMode::RequireSameOriginDataInherits | SecurityMode::RequireSameOriginDataBlocked
        )
    }

    pub fn allows_cross_origin(&self) -> bool {
        matches!(
            self,
            SecurityMode::AllowCrossOriginDataInherits | SecurityMode::AllowCrossOriginDataNull
        )
    }

    pub fn requires_cors(&self) -> bool {
        matches!(self, SecurityMode::RequireCorsDataInherits)
    }

    /// Whether `data:` targets inherit the loading principal.
    pub fn data_inherits(&self) -> bool {
        matches!(
            self,
            SecurityMode::RequireSameOriginDataInherits
                | SecurityMode::AllowCrossOriginDataInherits
                | SecurityMode::RequireCorsDataInherits
        )
    }

    pub fn bits(&self) -> u32 {
        match self {
            SecurityMode::RequireSameOriginDataInherits => SEC_REQUIRE_SAME_ORIGIN_DATA_INHERITS,
            SecurityMode::RequireSameOriginDataBlocked => SEC_REQUIRE_SAME_ORIGIN_DATA_IS_BLOCKED,
            SecurityMode::AllowCrossOriginDataInherits => SEC_ALLOW_CROSS_ORIGIN_DATA_INHERITS,
            SecurityMode::AllowCrossOriginDataNull => SEC_ALLOW_CROSS_ORIGIN_DATA_IS_NULL,
            SecurityMode::RequireCorsDataInherits => SEC_REQUIRE_CORS_DATA_INHERITS,
        }
    }
}

impl TryFrom<u32> for SecurityMode {
    type Error = SecurityError;

    /// Exactly one mode bit must be set.
    fn try_from(bits: u32) -> SecurityResult<Self> {
        SecurityMode::ALL
            .into_iter()
            .find(|mode| mode.bits() == bits)
            .ok_or_else(|| {
                SecurityError::invalid(format!(
                    "need exactly one security mode to perform security checks, got {:#x}",
                    bits
                ))
            })
    }
}

/// Decoded security flag word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityFlags {
    pub mode: SecurityMode,
    pub require_cors_with_credentials: bool,
}

impl SecurityFlags {
    pub fn new(mode: SecurityMode) -> Self {
        Self {
            mode,
            require_cors_with_credentials: false,
        }
    }

    /// Decode a raw flag word. Unknown bits, no mode bit, or more than one
    /// mode bit are rejected.
    pub fn from_bits(bits: u32) -> SecurityResult<Self> {
        if bits & !(SEC_MODE_MASK | SEC_REQUIRE_CORS_WITH_CREDENTIALS) != 0 {
            return Err(SecurityError::invalid(format!(
                "unknown security flag bits {:#x}",
                bits
            )));
        }
        Ok(Self {
            mode: SecurityMode::try_from(bits & SEC_MODE_MASK)?,
            require_cors_with_credentials: bits & SEC_REQUIRE_CORS_WITH_CREDENTIALS != 0,
        })
    }

    pub fn bits(&self) -> u32 {
        let credentials = if self.require_cors_with_credentials {
            SEC_REQUIRE_CORS_WITH_CREDENTIALS
        } else {
            0
        };
        self.mode.bits() | credentials
    }
}

/// Whether the one-time checks already ran for a load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckState {
    NotChecked,
    Checked,
}

/// Kind of a DOM node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    Comment,
    Document,
    DocumentType,
    DocumentFragment,
}

/// The DOM node that initiated a load, as seen by content policies.
#[derive(Debug)]
pub struct Node {
    node_type: NodeType,
    name: String,
}

impl Node {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            node_type,
            name: name.into(),
        })
    }

    pub fn element(tag: &str) -> Arc<Self> {
        Self::new(NodeType::Element, tag.to_lowercase())
    }

    pub fn document() -> Arc<Self> {
        Self::new(NodeType::Document, "#document")
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Security metadata attached to a single logical load.
pub struct LoadInfo {
    flags: SecurityFlags,
    loading_principal: PrincipalRef,
    triggering_principal: PrincipalRef,
    content_policy_type: ContentPolicyType,
    internal_content_policy_type: Option<InternalContentPolicyType>,
    loading_node: Option<Weak<Node>>,
    initial_security_check_done: AtomicBool,
    enforce_security: AtomicBool,
}

impl LoadInfo {
    pub fn builder(loading_principal: PrincipalRef, mode: SecurityMode) -> LoadInfoBuilder {
        LoadInfoBuilder::new(loading_principal, mode)
    }

    pub fn security_flags(&self) -> SecurityFlags {
        self.flags
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.flags.mode
    }

    pub fn require_cors_with_credentials(&self) -> bool {
        self.flags.require_cors_with_credentials
    }

    pub fn loading_principal(&self) -> &PrincipalRef {
        &self.loading_principal
    }

    pub fn triggering_principal(&self) -> &PrincipalRef {
        &self.triggering_principal
    }

    pub fn content_policy_type(&self) -> ContentPolicyType {
        self.content_policy_type
    }

    pub fn internal_content_policy_type(&self) -> Option<InternalContentPolicyType> {
        self.internal_content_policy_type
    }

    /// The loading node, if one was given and it is still alive.
    pub fn loading_node(&self) -> Option<Arc<Node>> {
        self.loading_node.as_ref().and_then(Weak::upgrade)
    }

    pub fn check_state(&self) -> CheckState {
        if self.initial_security_check_done.load(Ordering::Acquire) {
            CheckState::Checked
        } else {
            CheckState::NotChecked
        }
    }

    pub fn initial_security_check_done(&self) -> bool {
        self.check_state() == CheckState::Checked
    }

    /// Whether redirects of this load must go back through the gate.
    pub fn enforce_security(&self) -> bool {
        self.enforce_security.load(Ordering::Acquire)
    }

    /// Move to `Checked` and turn on security enforcement, returning the
    /// state observed before the transition. The swap is atomic so only one
    /// evaluation ever observes `NotChecked`.
    pub(crate) fn begin_security_check(&self) -> CheckState {
        let was_done = self.initial_security_check_done.swap(true, Ordering::AcqRel);
        self.enforce_security.store(true, Ordering::Release);
        if was_done {
            CheckState::Checked
        } else {
            CheckState::NotChecked
        }
    }
}

impl fmt::Debug for LoadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadInfo")
            .field("flags", &self.flags)
            .field("loading_principal", &self.loading_principal.to_string())
            .field("triggering_principal", &self.triggering_principal.to_string())
            .field("content_policy_type", &self.content_policy_type)
            .field("internal_content_policy_type", &self.internal_content_policy_type)
            .field("check_state", &self.check_state())
            .field("enforce_security", &self.enforce_security())
            .finish()
    }
}

/// Builder for [`LoadInfo`].
pub struct LoadInfoBuilder {
    flags: SecurityFlags,
    loading_principal: PrincipalRef,
    triggering_principal: Option<PrincipalRef>,
    content_policy_type: ContentPolicyType,
    internal_content_policy_type: Option<InternalContentPolicyType>,
    loading_node: Option<Weak<Node>>,
}

impl LoadInfoBuilder {
    fn new(loading_principal: PrincipalRef, mode: SecurityMode) -> Self {
        Self {
            flags: SecurityFlags::new(mode),
            loading_principal,
            triggering_principal: None,
            content_policy_type: ContentPolicyType::Other,
            internal_content_policy_type: None,
            loading_node: None,
        }
    }

    /// Replace mode and credentials flag with a decoded flag word.
    pub fn security_flags(mut self, flags: SecurityFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn require_cors_with_credentials(mut self, with_credentials: bool) -> Self {
        self.flags.require_cors_with_credentials = with_credentials;
        self
    }

    /// Defaults to the loading principal (same handle).
    pub fn triggering_principal(mut self, principal: PrincipalRef) -> Self {
        self.triggering_principal = Some(principal);
        self
    }

    pub fn content_policy_type(mut self, policy_type: ContentPolicyType) -> Self {
        self.content_policy_type = policy_type;
        self.internal_content_policy_type = None;
        self
    }

    /// Set an internal sub-type; the external type follows from it.
    pub fn internal_content_policy_type(mut self, internal: InternalContentPolicyType) -> Self {
        self.content_policy_type = internal.external();
        self.internal_content_policy_type = Some(internal);
        self
    }

    pub fn loading_node(mut self, node: &Arc<Node>) -> Self {
        self.loading_node = Some(Arc::downgrade(node));
        self
    }

    pub fn build(self) -> LoadInfo {
        let triggering_principal = self
            .triggering_principal
            .unwrap_or_else(|| Arc::clone(&self.loading_principal));
        LoadInfo {
            flags: self.flags,
            loading_principal: self.loading_principal,
            triggering_principal,
            content_policy_type: self.content_policy_type,
            internal_content_policy_type: self.internal_content_policy_type,
            loading_node: self.loading_node,
            initial_security_check_done: AtomicBool::new(false),
            enforce_security: AtomicBool::new(false),
        }
    }
}

/// Check that the flags of a load describe exactly one usable mode.
///
/// Invalid flags are a caller bug. They are logged at `error` level and
/// returned as [`SecurityError::ConfigurationInvalid`] in every build
/// profile; debug builds do not panic.
pub fn validate_security_flags(load_info: &LoadInfo) -> SecurityResult<()> {
    let flags = load_info.security_flags();
    if flags.require_cors_with_credentials && !flags.mode.requires_cors() {
        tracing::error!(mode = ?flags.mode, "can not use cors-with-credentials without cors");
        return Err(SecurityError::invalid(format!(
            "cors-with-credentials requires {:?}, got {:?}",
            SecurityMode::RequireCorsDataInherits,
            flags.mode
        )));
    }
    Ok(())
}
