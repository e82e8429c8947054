//! Content policy types, verdicts and the content-policy stage of the gate.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use crate::config::UnsupportedContentTypes;
use crate::error::{SecurityError, SecurityResult};
use crate::load_info::{LoadInfo, Node, NodeType};
use crate::principal::Principal;

/// Category of the resource being loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentPolicyType {
    Invalid,
    Other,
    Script,
    Image,
    Stylesheet,
    Object,
    Document,
    Subdocument,
    Refresh,
    Xbl,
    Ping,
    XmlHttpRequest,
    ObjectSubrequest,
    Dtd,
    Font,
    Media,
    Websocket,
    CspReport,
    Xslt,
    Beacon,
    Fetch,
    Imageset,
}

impl ContentPolicyType {
    /// Whether the gate knows how to classify this type.
    pub fn is_supported(&self) -> bool {
        matches!(self, ContentPolicyType::Media | ContentPolicyType::Beacon)
    }
}

/// Finer-grained classification used only for media loads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InternalContentPolicyType {
    Audio,
    Video,
    /// A text track (WebVTT) sub-resource.
    Track,
}

impl InternalContentPolicyType {
    pub fn external(&self) -> ContentPolicyType {
        ContentPolicyType::Media
    }
}

/// Decision returned by a content policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accept,
    /// Accept, but the policy recorded something about the load.
    AcceptAndNote,
    Reject,
    RejectType,
    RejectRequest,
    RejectServer,
    RejectUnknown,
}

impl Verdict {
    /// Decode a raw decision code. Codes outside the known set fail closed.
    pub fn from_code(code: i16) -> Self {
        match code {
            1 => Verdict::Accept,
            2 => Verdict::AcceptAndNote,
            -1 => Verdict::RejectRequest,
            -2 => Verdict::RejectType,
            -3 => Verdict::RejectServer,
            -4 => Verdict::Reject,
            _ => Verdict::RejectUnknown,
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            Verdict::Accept => 1,
            Verdict::AcceptAndNote => 2,
            Verdict::RejectRequest => -1,
            Verdict::RejectType => -2,
            Verdict::RejectServer => -3,
            Verdict::Reject => -4,
            Verdict::RejectUnknown => 0,
        }
    }

    pub fn is_rejected(&self) -> bool {
        !matches!(self, Verdict::Accept | Verdict::AcceptAndNote)
    }
}

/// Arguments handed to a content policy.
#[derive(Debug)]
pub struct ContentPolicyRequest<'a> {
    pub policy_type: ContentPolicyType,
    pub content_location: &'a Url,
    pub loading_principal: &'a Principal,
    pub context: Option<&'a Node>,
    pub mime_type_guess: &'a str,
    pub extra: Option<&'a (dyn Any + Send + Sync)>,
}

/// A pluggable verdict service that can veto a load.
pub trait ContentPolicy: Send + Sync {
    fn should_load(&self, request: &ContentPolicyRequest<'_>) -> Verdict;
}

/// Ordered registry of content policies. The first rejection wins.
#[derive(Default)]
pub struct ContentPolicyService {
    policies: RwLock<Vec<Arc<dyn ContentPolicy>>>,
}

impl ContentPolicyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, policy: Arc<dyn ContentPolicy>) {
        self.policies.write().push(policy);
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentPolicy for ContentPolicyService {
    fn should_load(&self, request: &ContentPolicyRequest<'_>) -> Verdict {
        // Loads on behalf of the browser itself are never vetoed.
        if request.loading_principal.is_system() {
            return Verdict::Accept;
        }

        let mut noted = false;
        for policy in self.policies.read().iter() {
            match policy.should_load(request) {
                Verdict::Accept => {}
                Verdict::AcceptAndNote => noted = true,
                rejected => return rejected,
            }
        }

        if noted {
            Verdict::AcceptAndNote
        } else {
            Verdict::Accept
        }
    }
}

/// Mime hint and requesting context derived from a load's policy type.
#[derive(Debug)]
struct Classification {
    mime_type_guess: &'static str,
    context: Option<Arc<Node>>,
}

fn classify(
    load_info: &LoadInfo,
    unsupported: UnsupportedContentTypes,
) -> SecurityResult<Classification> {
    let policy_type = load_info.content_policy_type();
    match policy_type {
        ContentPolicyType::Media => {
            let mime_type_guess = match load_info.internal_content_policy_type() {
                Some(InternalContentPolicyType::Track) => "text/vtt",
                _ => "",
            };
            let context = load_info.loading_node();
            require_node_type(&context, NodeType::Element, policy_type)?;
            Ok(Classification {
                mime_type_guess,
                context,
            })
        }
        ContentPolicyType::Beacon => {
            let context = load_info.loading_node();
            require_node_type(&context, NodeType::Document, policy_type)?;
            Ok(Classification {
                mime_type_guess: "",
                context,
            })
        }
        _ => match unsupported {
            UnsupportedContentTypes::Reject => {
                tracing::error!(?policy_type, "content policy type not supported yet");
                Err(SecurityError::invalid(format!(
                    "content policy type {:?} is not supported",
                    policy_type
                )))
            }
            UnsupportedContentTypes::Consult => {
                tracing::debug!(?policy_type, "consulting content policy for unsupported type");
                Ok(Classification {
                    mime_type_guess: "",
                    context: None,
                })
            }
        },
    }
}

/// A loading node of the wrong kind is a caller bug; it fails the load in
/// every build profile.
fn require_node_type(
    node: &Option<Arc<Node>>,
    expected: NodeType,
    policy_type: ContentPolicyType,
) -> SecurityResult<()> {
    match node {
        Some(node) if node.node_type() != expected => {
            tracing::error!(
                ?policy_type,
                ?expected,
                actual = ?node.node_type(),
                "loading node has the wrong type"
            );
            Err(SecurityError::invalid(format!(
                "{:?} loads require a loading node of type {:?}, got {:?}",
                policy_type,
                expected,
                node.node_type()
            )))
        }
        _ => Ok(()),
    }
}

/// Classify the load, then ask `policy` whether it may proceed.
pub fn do_content_security_checks(
    target: &Url,
    load_info: &LoadInfo,
    policy: &dyn ContentPolicy,
    unsupported: UnsupportedContentTypes,
) -> SecurityResult<Verdict> {
    let classification = classify(load_info, unsupported)?;

    let request = ContentPolicyRequest {
        policy_type: load_info.content_policy_type(),
        content_location: target,
        loading_principal: load_info.loading_principal(),
        context: classification.context.as_deref(),
        mime_type_guess: classification.mime_type_guess,
        extra: None,
    };
    let verdict = policy.should_load(&request);

    if verdict.is_rejected() {
        tracing::warn!(url = %target, ?verdict, "content policy blocked load");
        return Err(SecurityError::ContentBlocked {
            url: target.to_string(),
            verdict,
        });
    }
    Ok(verdict)
}
