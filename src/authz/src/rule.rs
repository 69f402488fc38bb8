//! Rule definition and storage

use crate::error::{AuthzError, Result};
use crate::matcher::{self, WILDCARD};
use crate::types::{RoleId, RuleId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

/// Rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleType {
    /// Anyone, including anonymous callers
    Public,
    /// Listed roles; an empty list admits any authenticated principal
    Allow,
    /// Listed roles are denied; an empty list denies everyone
    #[serde(alias = "FORBIDE")]
    Forbid,
    /// Any authenticated principal
    #[serde(alias = "AUTH")]
    Authenticated,
}

impl RuleType {
    /// Whether a matching rule of this type can grant access on its own
    pub fn is_permissive(self) -> bool {
        matches!(self, RuleType::Allow | RuleType::Authenticated)
    }
}

/// Authorization rule for one HTTP endpoint or endpoint pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Uppercase HTTP method (GET, POST, ...)
    pub method: String,

    /// Path with literal segments or single-level `*` wildcards
    pub path: String,

    /// Rule type
    #[serde(rename = "type")]
    pub rule_type: RuleType,

    /// Role ids the rule applies to
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,

    /// Owning tenant; `None` means shared by every tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Informational priority (higher first in store listings)
    #[serde(default)]
    pub priority: i32,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    /// Create a rule with no roles
    pub fn new(method: impl AsRef<str>, path: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            rule_type,
            roles: BTreeSet::new(),
            tenant: None,
            priority: 0,
            description: None,
        }
    }

    /// PUBLIC rule
    pub fn public(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self::new(method, path, RuleType::Public)
    }

    /// ALLOW rule for the given roles
    pub fn allow(
        method: impl AsRef<str>,
        path: impl Into<String>,
        roles: impl IntoIterator<Item = RoleId>,
    ) -> Self {
        Self::new(method, path, RuleType::Allow).with_roles(roles)
    }

    /// FORBID rule for the given roles
    pub fn forbid(
        method: impl AsRef<str>,
        path: impl Into<String>,
        roles: impl IntoIterator<Item = RoleId>,
    ) -> Self {
        Self::new(method, path, RuleType::Forbid).with_roles(roles)
    }

    /// AUTHENTICATED rule
    pub fn authenticated(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self::new(method, path, RuleType::Authenticated)
    }

    /// Replace the role set
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// Scope the rule to a tenant
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the informational priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Rule id, `"METHOD|PATH"`
    pub fn id(&self) -> RuleId {
        index_key(&self.method, &self.path)
    }

    /// Rules with the same method, path and tenant replace each other
    pub fn same_identity(&self, other: &Rule) -> bool {
        self.method.eq_ignore_ascii_case(&other.method)
            && self.path == other.path
            && self.tenant == other.tenant
    }

    /// Whether the path contains a wildcard segment
    pub fn has_wildcard(&self) -> bool {
        matcher::has_wildcard(&self.path)
    }

    /// Whether the rule lists at least one of the given roles
    pub fn applies_to_any(&self, roles: &HashSet<RoleId>) -> bool {
        self.roles.iter().any(|role| roles.contains(role))
    }

    /// Whether this rule is visible to the given tenant
    pub fn visible_to(&self, tenant: Option<&str>) -> bool {
        match &self.tenant {
            None => true,
            Some(owner) => Some(owner.as_str()) == tenant,
        }
    }

    /// Validate the rule record
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() || !self.method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AuthzError::invalid_rule(self.id(), "method must be an HTTP verb"));
        }

        if !self.path.starts_with('/') {
            return Err(AuthzError::invalid_rule(self.id(), "path must start with '/'"));
        }

        if self.path.len() > 1 {
            // A single trailing slash is kept as an empty final segment
            let body = self.path[1..].strip_suffix('/').unwrap_or(&self.path[1..]);
            for segment in body.split('/') {
                if segment.is_empty() {
                    return Err(AuthzError::invalid_rule(self.id(), "path has an empty segment"));
                }
                if segment != WILDCARD && segment.contains('*') {
                    return Err(AuthzError::invalid_rule(
                        self.id(),
                        "'*' must be a whole segment",
                    ));
                }
            }
        }

        if self.rule_type == RuleType::Public && !self.roles.is_empty() {
            return Err(AuthzError::invalid_rule(self.id(), "PUBLIC rules cannot list roles"));
        }

        Ok(())
    }
}

/// Exact-index key for a method and path
pub fn index_key(method: &str, path: &str) -> String {
    format!("{}|{}", method, path)
}

/// Invalidates cached rule state after a rule mutation
pub trait CacheInvalidator: Send + Sync {
    /// Force the next access to rebuild the rules cache
    fn invalidate_rules_cache(&self);
}

/// Rule store trait
///
/// Implemented by whatever persists rule records. The engine only ever reads
/// the complete visible set; administration lives elsewhere.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules visible to a tenant: shared rules plus the tenant's own
    async fn fetch_all_visible_rules(&self, tenant: Option<&str>) -> Result<Vec<Rule>>;
}

/// In-memory rule store implementation
pub struct InMemoryRuleStore {
    rules: Arc<RwLock<Vec<Rule>>>,
    invalidator: parking_lot::Mutex<Option<Weak<dyn CacheInvalidator>>>,
}

impl InMemoryRuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_rules(Vec::new())
    }

    /// Create a store preloaded with rules
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
            invalidator: parking_lot::Mutex::new(None),
        }
    }

    /// Create a store from a JSON array of rule records, validating each
    pub fn from_json(json: &str) -> Result<Self> {
        let mut rules: Vec<Rule> = serde_json::from_str(json)?;
        for rule in &mut rules {
            rule.method.make_ascii_uppercase();
            rule.validate()?;
        }
        Ok(Self::with_rules(rules))
    }

    /// Fire `invalidator` after every mutation
    pub fn set_invalidator(&self, invalidator: Weak<dyn CacheInvalidator>) {
        *self.invalidator.lock() = Some(invalidator);
    }

    /// Insert a rule, replacing any rule with the same identity
    pub async fn put(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        {
            let mut rules = self.rules.write().await;
            match rules.iter_mut().find(|existing| existing.same_identity(&rule)) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        }
        self.notify();
        Ok(())
    }

    /// Remove the rule with the given identity; returns whether one existed
    pub async fn remove(&self, method: &str, path: &str, tenant: Option<&str>) -> bool {
        let removed = {
            let mut rules = self.rules.write().await;
            let before = rules.len();
            rules.retain(|rule| {
                !(rule.method.eq_ignore_ascii_case(method)
                    && rule.path == path
                    && rule.tenant.as_deref() == tenant)
            });
            rules.len() != before
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Replace the whole rule set
    pub async fn replace_all(&self, rules: Vec<Rule>) {
        *self.rules.write().await = rules;
        self.notify();
    }

    /// List all stored rules regardless of tenant
    pub async fn list(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    fn notify(&self) {
        let invalidator = self.invalidator.lock().as_ref().and_then(Weak::upgrade);
        if let Some(invalidator) = invalidator {
            debug!("Rule store mutated, invalidating rules cache");
            invalidator.invalidate_rules_cache();
        }
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn fetch_all_visible_rules(&self, tenant: Option<&str>) -> Result<Vec<Rule>> {
        let rules = self.rules.read().await;
        let mut visible: Vec<Rule> = rules
            .iter()
            .filter(|rule| rule.visible_to(tenant))
            .cloned()
            .collect();

        // Sort by priority (descending), insertion order otherwise
        visible.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rule_id_and_method_normalization() {
        let rule = Rule::allow("get", "/api/users", [1]);
        assert_eq!(rule.method, "GET");
        assert_eq!(rule.id(), "GET|/api/users");
    }

    #[test]
    fn test_rule_type_serde() {
        let rule: Rule = serde_json::from_str(
            r#"{"method":"DELETE","path":"/api/posts/*","type":"FORBIDE","roles":[3]}"#,
        )
        .unwrap();
        assert_eq!(rule.rule_type, RuleType::Forbid);
        assert!(rule.has_wildcard());

        let json = serde_json::to_string(&RuleType::Authenticated).unwrap();
        assert_eq!(json, r#""AUTHENTICATED""#);
    }

    #[tokio::test]
    async fn test_store_from_json() {
        let store = InMemoryRuleStore::from_json(
            r#"[
                {"method":"get","path":"/health","type":"PUBLIC"},
                {"method":"POST","path":"/posts","type":"ALLOW","roles":[2],"tenant":"acme"}
            ]"#,
        )
        .unwrap();

        let rules = store.list().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].method, "GET");

        let err = InMemoryRuleStore::from_json(r#"[{"method":"GET","path":"x","type":"ALLOW"}]"#);
        assert!(matches!(err, Err(AuthzError::InvalidRule { .. })));

        let err = InMemoryRuleStore::from_json("not json");
        assert!(matches!(err, Err(AuthzError::Serialization(_))));
    }

    #[test]
    fn test_rule_validation() {
        assert!(Rule::allow("GET", "/api/users/*", [1]).validate().is_ok());
        assert!(Rule::public("GET", "/").validate().is_ok());
        assert!(Rule::public("GET", "/api/users/").validate().is_ok());
        assert!(Rule::allow("GET", "/api/*/", [1]).validate().is_ok());

        assert!(Rule::public("GET", "api").validate().is_err());
        assert!(Rule::public("GET", "/api//users").validate().is_err());
        assert!(Rule::public("GET", "/api/users//").validate().is_err());
        assert!(Rule::public("GET", "/api/us*").validate().is_err());
        assert!(Rule::public("G ET", "/api").validate().is_err());
        assert!(Rule::public("GET", "/api").with_roles([1]).validate().is_err());
    }

    #[test]
    fn test_tenant_visibility() {
        let shared = Rule::public("GET", "/health");
        let billing = Rule::public("GET", "/invoices").with_tenant("billing");

        assert!(shared.visible_to(None));
        assert!(shared.visible_to(Some("billing")));
        assert!(billing.visible_to(Some("billing")));
        assert!(!billing.visible_to(Some("shipping")));
        assert!(!billing.visible_to(None));
    }

    #[tokio::test]
    async fn test_store_fetch_filters_tenant_and_sorts() {
        let store = InMemoryRuleStore::with_rules(vec![
            Rule::public("GET", "/a").with_priority(1),
            Rule::public("GET", "/b").with_tenant("billing").with_priority(5),
            Rule::public("GET", "/c").with_tenant("shipping"),
        ]);

        let rules = store.fetch_all_visible_rules(Some("billing")).await.unwrap();
        let paths: Vec<_> = rules.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/a"]);

        let shared_only = store.fetch_all_visible_rules(None).await.unwrap();
        assert_eq!(shared_only.len(), 1);
    }

    #[tokio::test]
    async fn test_store_put_replaces_same_identity() {
        let store = InMemoryRuleStore::new();
        store.put(Rule::allow("GET", "/a", [1])).await.unwrap();
        store.put(Rule::forbid("GET", "/a", [2])).await.unwrap();
        store.put(Rule::allow("GET", "/a", [3]).with_tenant("t1")).await.unwrap();

        let rules = store.list().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].rule_type, RuleType::Forbid);

        assert!(store.remove("get", "/a", Some("t1")).await);
        assert!(!store.remove("GET", "/a", Some("t1")).await);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_rule() {
        let store = InMemoryRuleStore::new();
        let result = store.put(Rule::public("GET", "no-slash")).await;
        assert!(matches!(result, Err(AuthzError::InvalidRule { .. })));
    }

    struct CountingInvalidator(AtomicUsize);

    impl CacheInvalidator for CountingInvalidator {
        fn invalidate_rules_cache(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_store_mutations_fire_invalidator() {
        let counter = Arc::new(CountingInvalidator(AtomicUsize::new(0)));
        let store = InMemoryRuleStore::new();
        let weak: Weak<dyn CacheInvalidator> = Arc::downgrade(&counter) as Weak<dyn CacheInvalidator>;
        store.set_invalidator(weak);

        store.put(Rule::public("GET", "/a")).await.unwrap();
        store.remove("GET", "/a", None).await;
        store.replace_all(Vec::new()).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }
}
