//! Route authorization engine
//!
//! Combines the rules cache, the role cache and the caller's identity into an
//! ALLOW/DENY verdict.

pub mod decision;
pub mod metrics;
pub mod role_cache;
pub mod rule_cache;

pub use decision::{AccessRequest, Decision, DecisionReason, DenyKind};
pub use metrics::{EngineMetrics, MetricsCollector};
pub use role_cache::RoleCache;
pub use rule_cache::{RefreshObserver, RuleCache, RuleSnapshot, SnapshotStats};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::role::RoleStore;
use crate::rule::{CacheInvalidator, Rule, RuleStore, RuleType};
use crate::types::RoleId;

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info};

/// Main authorization engine
///
/// # Evaluation order
///
/// ```text
/// lookup ─▶ PUBLIC? ─▶ principal? ─▶ role context ─▶ super role ─▶ FORBID ─▶ ALLOW ─▶ deny
///   │          │            │              │              │            │         │
///  deny      allow         deny           deny          allow        deny      allow
/// ```
///
/// The first terminal result wins.
pub struct AuthzEngine {
    rules: Arc<RuleCache>,
    roles: Arc<RoleCache>,
    metrics: Option<Arc<MetricsCollector>>,
    config: EngineConfig,
}

impl AuthzEngine {
    /// Create an engine; rules are fetched on the first request
    pub fn new(
        config: EngineConfig,
        rule_store: Arc<dyn RuleStore>,
        role_store: Arc<dyn RoleStore>,
    ) -> Self {
        let cache = RuleCache::new(rule_store, config.tenant.clone(), config.rule_cache_ttl);
        Self::assemble(config, cache, role_store)
    }

    /// Create an engine whose rules cache starts from `rules` instead of a fetch
    pub fn preloaded(
        config: EngineConfig,
        rule_store: Arc<dyn RuleStore>,
        role_store: Arc<dyn RoleStore>,
        rules: Vec<Rule>,
    ) -> Self {
        let cache = RuleCache::with_snapshot(
            rule_store,
            config.tenant.clone(),
            config.rule_cache_ttl,
            rules,
        );
        Self::assemble(config, cache, role_store)
    }

    fn assemble(config: EngineConfig, cache: RuleCache, role_store: Arc<dyn RoleStore>) -> Self {
        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        let cache = match &metrics {
            Some(collector) => cache.with_observer(collector.clone() as Arc<dyn RefreshObserver>),
            None => cache,
        };

        let roles = RoleCache::new(role_store, config.super_role_name.clone());

        info!(
            tenant = config.tenant.as_deref().unwrap_or("-"),
            ttl_secs = config.rule_cache_ttl.as_secs(),
            super_role = config.super_role_name.as_deref().unwrap_or("-"),
            metrics = config.enable_metrics,
            "AuthzEngine initialized"
        );

        Self {
            rules: Arc::new(cache),
            roles: Arc::new(roles),
            metrics,
            config,
        }
    }

    /// Authorize one request.
    ///
    /// Denials are returned as `Ok` decisions. An error means the role store
    /// could not supply the roles of a principal that arrived without them.
    pub async fn authorize(&self, request: &AccessRequest<'_>) -> Result<Decision> {
        let start = Instant::now();
        let result = self.evaluate(request).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(decision) => metrics.record_decision(decision),
                Err(_) => metrics.record_error(),
            }
            metrics.record_latency(start.elapsed());
        }

        if let Ok(decision) = &result {
            debug!(
                method = request.method,
                path = request.path,
                allowed = decision.allowed,
                reason = decision.reason.label(),
                "Authorization decision"
            );
        }

        result
    }

    async fn evaluate(&self, request: &AccessRequest<'_>) -> Result<Decision> {
        // Step 1: matching rules, fail closed when none
        let rules = self.rules.lookup(request.method, request.path).await;
        if rules.is_empty() {
            return Ok(Decision::deny(request, DecisionReason::NoRuleFound));
        }

        // Step 2: PUBLIC admits anyone
        if let Some(rule) = rules.iter().find(|r| r.rule_type == RuleType::Public) {
            return Ok(Decision::allow(
                request,
                DecisionReason::PublicRule { rule_id: rule.id() },
            ));
        }

        // Step 3: everything else requires authentication
        let principal = match request.principal {
            Some(principal) if principal.is_authenticated() => principal,
            _ => return Ok(Decision::deny(request, DecisionReason::AuthenticationRequired)),
        };

        let held: Cow<'_, HashSet<RoleId>> = match principal.role_ids() {
            Some(roles) => Cow::Borrowed(roles),
            None => {
                debug!(
                    principal = principal.principal_id(),
                    "Roles not attached, loading from role store"
                );
                Cow::Owned(self.roles.role_ids_of_principal(principal.principal_id()).await?)
            }
        };

        // Step 4: role context narrows the effective set to one held role
        let role_context = request.role_context.map(str::trim).filter(|name| !name.is_empty());
        let effective: Cow<'_, HashSet<RoleId>> = match role_context {
            None => Cow::Borrowed(&*held),
            Some(name) => match self.roles.role_id_by_name(name).await {
                Ok(id) if held.contains(&id) => Cow::Owned(HashSet::from([id])),
                outcome => {
                    if let Err(e) = outcome {
                        debug!(role = name, "Role context not resolved: {}", e);
                    }
                    let decision = Decision::deny(
                        request,
                        DecisionReason::UnknownRoleContext { role: name.to_string() },
                    );
                    return Ok(decision.with_effective_roles(held.iter().copied()));
                }
            },
        };
        let effective_roles = || effective.iter().copied();

        // Step 5: holding the super role bypasses rule evaluation, whatever the context
        if let Some(super_role) = self.roles.super_role_id().await {
            if held.contains(&super_role) {
                let decision =
                    Decision::allow(request, DecisionReason::SuperRole { role_id: super_role });
                return Ok(decision.with_effective_roles(held.iter().copied()));
            }
        }

        // Step 6: FORBID is terminal and always checked first
        let mut cleared_forbid = None;
        for rule in rules.iter().filter(|r| r.rule_type == RuleType::Forbid) {
            if rule.roles.is_empty() || rule.applies_to_any(&effective) {
                let decision =
                    Decision::deny(request, DecisionReason::Forbidden { rule_id: Some(rule.id()) });
                return Ok(decision.with_effective_roles(effective_roles()));
            }
            cleared_forbid.get_or_insert_with(|| rule.id());
        }

        // Step 7: a cleared FORBID with no permissive rule beside it admits
        let has_permissive = rules.iter().any(|r| r.rule_type.is_permissive());
        if let Some(rule_id) = cleared_forbid {
            if !has_permissive {
                let decision = Decision::allow(request, DecisionReason::ForbidCleared { rule_id });
                return Ok(decision.with_effective_roles(effective_roles()));
            }
        }

        // Step 8: ALLOW / AUTHENTICATED
        for rule in rules.iter().filter(|r| r.rule_type.is_permissive()) {
            let admits = rule.rule_type == RuleType::Authenticated
                || rule.roles.is_empty()
                || rule.applies_to_any(&effective);
            if admits {
                let decision =
                    Decision::allow(request, DecisionReason::PermissiveRule { rule_id: rule.id() });
                return Ok(decision.with_effective_roles(effective_roles()));
            }
        }

        // Step 9
        let decision = Decision::deny(request, DecisionReason::Forbidden { rule_id: None });
        Ok(decision.with_effective_roles(effective_roles()))
    }

    /// Force the rules cache to rebuild on the next request
    pub fn invalidate_cache(&self) {
        self.rules.invalidate();
    }

    /// Rebuild the rules cache now
    pub async fn refresh_rules(&self) -> Result<u64> {
        self.rules.refresh().await
    }

    /// Clear memoized role names and the super-role id
    pub async fn refresh_roles(&self) {
        self.roles.refresh().await;
    }

    /// Weak handle for rule stores that invalidate after mutations
    pub fn invalidator(&self) -> Weak<dyn CacheInvalidator> {
        let cache: Arc<dyn CacheInvalidator> = self.rules.clone();
        Arc::downgrade(&cache)
    }

    /// Rules cache
    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        &self.rules
    }

    /// Role cache
    pub fn role_cache(&self) -> &Arc<RoleCache> {
        &self.roles
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get engine metrics
    pub fn get_metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|metrics| metrics.get_metrics())
    }

    /// Metrics in Prometheus text format
    pub fn export_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(|metrics| metrics.export_prometheus())
    }

    /// Rules cache statistics
    pub fn cache_stats(&self) -> SnapshotStats {
        self.rules.stats()
    }
}

impl CacheInvalidator for AuthzEngine {
    fn invalidate_rules_cache(&self) {
        self.invalidate_cache();
    }
}
