//! # Routegate Authorization Engine
//!
//! Route-level access control for HTTP services.
//!
//! ## Features
//!
//! - **Declarative rules** keyed by method and path, with `*` segment wildcards
//! - **Four rule types**: PUBLIC, ALLOW, FORBID and AUTHENTICATED
//! - **Fail-closed** evaluation: an endpoint without rules is denied
//! - **Lock-free reads** of an immutable rules snapshot refreshed on a TTL
//! - **Role context** narrowing and a configurable super role
//! - **Axum middleware** behind the `http` feature
//!
//! ## Example
//!
//! ```rust
//! use routegate_authz::{
//!     AccessRequest, AuthzEngine, EngineConfig, InMemoryRoleStore, InMemoryRuleStore,
//!     Principal, Role, Rule,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules = InMemoryRuleStore::with_rules(vec![
//!         Rule::public("GET", "/health"),
//!         Rule::allow("GET", "/users/*", [2]),
//!     ]);
//!     let roles = InMemoryRoleStore::with_roles([Role::new(2, "editor")]);
//!     let engine = AuthzEngine::new(EngineConfig::default(), Arc::new(rules), Arc::new(roles));
//!
//!     let alice = Principal::new("alice").with_roles([2]);
//!     let request = AccessRequest::new("GET", "/users/42").with_principal(&alice);
//!
//!     let decision = engine.authorize(&request).await?;
//!
//!     if decision.allowed {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod role;
pub mod rule;
pub mod types;

#[cfg(feature = "http")]
pub mod http;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{
    AccessRequest, AuthzEngine, Decision, DecisionReason, DenyKind, EngineMetrics,
    RefreshObserver, RuleCache, RuleSnapshot, SnapshotStats,
};
pub use error::{AuthzError, Result};
pub use role::{InMemoryRoleStore, Role, RoleStore};
pub use rule::{CacheInvalidator, InMemoryRuleStore, Rule, RuleStore, RuleType};
pub use types::{Principal, PrincipalContext, RoleId, RuleId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
