//! Authorization decision types and request handling

use crate::types::{PrincipalContext, RoleId, RuleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One request to authorize
#[derive(Clone, Copy)]
pub struct AccessRequest<'a> {
    /// HTTP method
    pub method: &'a str,

    /// Concrete request path
    pub path: &'a str,

    /// Authenticated caller, if any
    pub principal: Option<&'a dyn PrincipalContext>,

    /// Client-selected role name narrowing the check to a single role
    pub role_context: Option<&'a str>,
}

impl<'a> AccessRequest<'a> {
    /// Anonymous request with no role context
    pub fn new(method: &'a str, path: &'a str) -> Self {
        Self {
            method,
            path,
            principal: None,
            role_context: None,
        }
    }

    /// Attach the caller
    pub fn with_principal(mut self, principal: &'a dyn PrincipalContext) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Narrow the check to one role the caller holds
    pub fn with_role_context(mut self, role_context: &'a str) -> Self {
        self.role_context = Some(role_context);
        self
    }
}

impl fmt::Debug for AccessRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("principal", &self.principal.map(|p| p.principal_id()))
            .field("role_context", &self.role_context)
            .finish()
    }
}

/// Category of a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    /// Endpoint has no rule; fail closed
    NoRuleFound,
    /// Non-public endpoint called without a principal
    AuthenticationRequired,
    /// FORBID matched or no permissive rule was satisfied
    Forbidden,
    /// Role context unknown or not held by the caller
    UnknownRoleContext,
}

impl DenyKind {
    /// Short label for logs and metrics
    pub fn label(self) -> &'static str {
        match self {
            DenyKind::NoRuleFound => "no_rule_found",
            DenyKind::AuthenticationRequired => "authentication_required",
            DenyKind::Forbidden => "forbidden",
            DenyKind::UnknownRoleContext => "unknown_role_context",
        }
    }
}

/// Reason for authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// A PUBLIC rule matched
    PublicRule { rule_id: RuleId },

    /// Caller holds the super role
    SuperRole { role_id: RoleId },

    /// An ALLOW or AUTHENTICATED rule admitted the caller
    PermissiveRule { rule_id: RuleId },

    /// The only applicable FORBID rule did not list the caller's roles
    ForbidCleared { rule_id: RuleId },

    /// No rule matches the endpoint
    NoRuleFound,

    /// Authentication is required
    AuthenticationRequired,

    /// Denied by a FORBID rule, or no permissive rule was satisfied
    Forbidden { rule_id: Option<RuleId> },

    /// Role context could not be used
    UnknownRoleContext { role: String },
}

impl DecisionReason {
    /// Denial category, `None` for allowing reasons
    pub fn deny_kind(&self) -> Option<DenyKind> {
        match self {
            DecisionReason::NoRuleFound => Some(DenyKind::NoRuleFound),
            DecisionReason::AuthenticationRequired => Some(DenyKind::AuthenticationRequired),
            DecisionReason::Forbidden { .. } => Some(DenyKind::Forbidden),
            DecisionReason::UnknownRoleContext { .. } => Some(DenyKind::UnknownRoleContext),
            _ => None,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            DecisionReason::PublicRule { .. } => "public_rule",
            DecisionReason::SuperRole { .. } => "super_role",
            DecisionReason::PermissiveRule { .. } => "permissive_rule",
            DecisionReason::ForbidCleared { .. } => "forbid_cleared",
            DecisionReason::NoRuleFound => "no_rule_found",
            DecisionReason::AuthenticationRequired => "authentication_required",
            DecisionReason::Forbidden { .. } => "forbidden",
            DecisionReason::UnknownRoleContext { .. } => "unknown_role_context",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::PublicRule { rule_id } => write!(f, "public rule {}", rule_id),
            DecisionReason::SuperRole { role_id } => write!(f, "super role {}", role_id),
            DecisionReason::PermissiveRule { rule_id } => write!(f, "allowed by rule {}", rule_id),
            DecisionReason::ForbidCleared { rule_id } => {
                write!(f, "forbid rule {} does not apply", rule_id)
            }
            DecisionReason::NoRuleFound => f.write_str("no rule"),
            DecisionReason::AuthenticationRequired => f.write_str("authentication required"),
            DecisionReason::Forbidden { rule_id: Some(rule_id) } => {
                write!(f, "forbidden by rule {}", rule_id)
            }
            DecisionReason::Forbidden { rule_id: None } => {
                f.write_str("no satisfied permissive rule")
            }
            DecisionReason::UnknownRoleContext { role } => {
                write!(f, "unknown or unheld role context '{}'", role)
            }
        }
    }
}

/// Authorization decision with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision ID
    pub id: String,

    /// Whether the request is allowed
    pub allowed: bool,

    /// Reason for the decision
    pub reason: DecisionReason,

    /// HTTP method evaluated
    pub method: String,

    /// Request path evaluated
    pub path: String,

    /// Role ids the decision was evaluated against, sorted
    #[serde(default)]
    pub effective_roles: Vec<RoleId>,

    /// Decision timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl Decision {
    fn new(allowed: bool, request: &AccessRequest<'_>, reason: DecisionReason) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            allowed,
            reason,
            method: request.method.to_string(),
            path: request.path.to_string(),
            effective_roles: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Allow decision
    pub fn allow(request: &AccessRequest<'_>, reason: DecisionReason) -> Self {
        Self::new(true, request, reason)
    }

    /// Deny decision
    pub fn deny(request: &AccessRequest<'_>, reason: DecisionReason) -> Self {
        Self::new(false, request, reason)
    }

    /// Record the effective role set
    pub fn with_effective_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        let mut roles: Vec<RoleId> = roles.into_iter().collect();
        roles.sort_unstable();
        self.effective_roles = roles;
        self
    }

    /// Denial category, `None` when allowed
    pub fn deny_kind(&self) -> Option<DenyKind> {
        self.reason.deny_kind()
    }
}
