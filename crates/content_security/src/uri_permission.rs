//! Per-principal URI load permissions for cross-origin loads.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::error::{SecurityError, SecurityResult};
use crate::load_info::LoadInfo;
use crate::principal::{inherits_security_context, Principal};

/// How strictly a URI load is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strictness {
    #[default]
    Standard,
    /// Also refuse targets that would inherit the loader's principal.
    DisallowInheritPrincipal,
    /// Also refuse `javascript:` targets.
    DisallowScript,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{0}")]
pub struct UriDenied(pub String);

/// Decides whether a principal may load a URI at all.
pub trait UriLoadPermission: Send + Sync {
    fn check_load_uri(
        &self,
        principal: &Principal,
        target: &Url,
        strictness: Strictness,
    ) -> Result<(), UriDenied>;
}

/// Scheme-based URI load permission checks.
#[derive(Clone, Debug)]
pub struct SchemeSecurityManager {
    web_schemes: HashSet<String>,
}

impl SchemeSecurityManager {
    pub fn new() -> Self {
        let web_schemes = ["http", "https", "ws", "wss", "ftp", "data", "blob"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self { web_schemes }
    }

    /// Make `scheme` loadable by any principal.
    pub fn allow_scheme(mut self, scheme: &str) -> Self {
        self.web_schemes.insert(scheme.to_lowercase());
        self
    }
}

impl Default for SchemeSecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UriLoadPermission for SchemeSecurityManager {
    fn check_load_uri(
        &self,
        principal: &Principal,
        target: &Url,
        strictness: Strictness,
    ) -> Result<(), UriDenied> {
        if principal.is_system() {
            return Ok(());
        }

        if strictness == Strictness::DisallowInheritPrincipal && inherits_security_context(target) {
            return Err(UriDenied(format!(
                "{} would inherit the principal of its loader",
                target
            )));
        }

        let scheme = target.scheme();
        if self.web_schemes.contains(scheme) {
            return Ok(());
        }

        match scheme {
            "javascript" if strictness == Strictness::DisallowScript => {
                Err(UriDenied("javascript: URLs are not allowed here".to_string()))
            }
            "javascript" => Ok(()),
            "about" if inherits_security_context(target) => Ok(()),
            "file" => match principal.uri() {
                Some(uri) if uri.scheme() == "file" => Ok(()),
                _ => Err(UriDenied(format!(
                    "{} may not load local resource {}",
                    principal, target
                ))),
            },
            "about" | "chrome" | "resource" => Err(UriDenied(format!(
                "{} may not load privileged URL {}",
                principal, target
            ))),
            _ => Err(UriDenied(format!("unknown scheme {}:", scheme))),
        }
    }
}

/// Check that both the loading principal and, when it is a different
/// handle, the triggering principal may load `target`.
pub fn do_check_load_uri_checks(
    target: &Url,
    load_info: &LoadInfo,
    permissions: &dyn UriLoadPermission,
) -> SecurityResult<()> {
    if !load_info.security_mode().allows_cross_origin() {
        return Ok(());
    }

    let loading = load_info.loading_principal();
    check_principal(permissions, loading, target)?;

    let triggering = load_info.triggering_principal();
    if !Arc::ptr_eq(loading, triggering) {
        check_principal(permissions, triggering, target)?;
    }
    Ok(())
}

fn check_principal(
    permissions: &dyn UriLoadPermission,
    principal: &Principal,
    target: &Url,
) -> SecurityResult<()> {
    permissions
        .check_load_uri(principal, target, Strictness::Standard)
        .map_err(|denied| {
            tracing::warn!(principal = %principal, url = %target, reason = %denied, "URI load denied");
            SecurityError::UriLoadDenied {
                principal: principal.to_string(),
                url: target.to_string(),
            }
        })
}
