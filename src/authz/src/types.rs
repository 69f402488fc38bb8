//! Core authorization types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Unique role identifier
pub type RoleId = u64;

/// Rule identifier, formatted as `"METHOD|PATH"`
pub type RuleId = String;

/// What the decision engine needs to know about a caller.
///
/// The engine never re-verifies this against storage. The one exception is
/// [`PrincipalContext::role_ids`] returning `None`, which means roles were not
/// attached upstream and must be fetched from the role store by principal id.
pub trait PrincipalContext: Send + Sync {
    /// Stable principal identifier, used for the role fallback lookup
    fn principal_id(&self) -> &str;

    /// Whether upstream authentication succeeded
    fn is_authenticated(&self) -> bool {
        true
    }

    /// Role ids attached by upstream authentication
    fn role_ids(&self) -> Option<&HashSet<RoleId>>;
}

/// Authenticated caller as produced by an upstream token validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g., a user id or "svc:billing")
    pub id: String,

    /// Whether the token was validated
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,

    /// Role ids carried by the token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ids: Option<HashSet<RoleId>>,
}

fn default_authenticated() -> bool {
    true
}

impl Principal {
    /// Create an authenticated principal with no attached roles
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated: true,
            role_ids: None,
        }
    }

    /// Attach role ids
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.role_ids = Some(roles.into_iter().collect());
        self
    }

    /// Mark the principal as not authenticated
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

impl PrincipalContext for Principal {
    fn principal_id(&self) -> &str {
        &self.id
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn role_ids(&self) -> Option<&HashSet<RoleId>> {
        self.role_ids.as_ref()
    }
}
