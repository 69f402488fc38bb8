//! Engine configuration

use std::time::Duration;

/// Default rules cache TTL (100 minutes)
pub const DEFAULT_RULE_CACHE_TTL: Duration = Duration::from_secs(100 * 60);

/// Default super-role name
pub const DEFAULT_SUPER_ROLE: &str = "super_admin";

/// Default header carrying the client-selected role context
pub const DEFAULT_ROLE_CONTEXT_HEADER: &str = "X-Role-Context";

/// Tenant names longer than this are truncated
pub const MAX_TENANT_LEN: usize = 20;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a rules snapshot is served before a lazy rebuild
    pub rule_cache_ttl: Duration,

    /// Role whose holders bypass FORBID/ALLOW evaluation; `None` disables it
    pub super_role_name: Option<String>,

    /// Tenant whose rules (plus shared rules) this engine enforces
    pub tenant: Option<String>,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Request header carrying the role context
    pub role_context_header: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_cache_ttl: DEFAULT_RULE_CACHE_TTL,
            super_role_name: Some(DEFAULT_SUPER_ROLE.to_string()),
            tenant: None,
            enable_metrics: true,
            role_context_header: DEFAULT_ROLE_CONTEXT_HEADER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// - `ROUTEGATE_CACHE_TTL_SECS` - rules cache TTL in seconds (default: 6000)
    /// - `ROUTEGATE_SUPER_ROLE` - super-role name, empty disables (default: super_admin)
    /// - `ROUTEGATE_TENANT` - tenant name (default: none)
    /// - `ROUTEGATE_METRICS` - `true`/`false` (default: true)
    /// - `ROUTEGATE_ROLE_CONTEXT_HEADER` - role context header (default: X-Role-Context)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let rule_cache_ttl = lookup("ROUTEGATE_CACHE_TTL_SECS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.rule_cache_ttl);

        let super_role_name = match lookup("ROUTEGATE_SUPER_ROLE") {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name.trim().to_string()),
            None => defaults.super_role_name,
        };

        let enable_metrics = lookup("ROUTEGATE_METRICS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.enable_metrics);

        let role_context_header = lookup("ROUTEGATE_ROLE_CONTEXT_HEADER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.role_context_header);

        let config = Self {
            rule_cache_ttl,
            super_role_name,
            tenant: None,
            enable_metrics,
            role_context_header,
        };

        match lookup("ROUTEGATE_TENANT").filter(|s| !s.trim().is_empty()) {
            Some(tenant) => config.with_tenant(tenant.trim()),
            None => config,
        }
    }

    /// Scope the engine to a tenant, truncated to [`MAX_TENANT_LEN`] characters
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        let tenant: String = tenant.into();
        self.tenant = Some(tenant.chars().take(MAX_TENANT_LEN).collect());
        self
    }

    /// Set the rules cache TTL
    pub fn with_rule_cache_ttl(mut self, ttl: Duration) -> Self {
        self.rule_cache_ttl = ttl;
        self
    }

    /// Set or clear the super-role name
    pub fn with_super_role(mut self, name: Option<&str>) -> Self {
        self.super_role_name = name.map(str::to_string);
        self
    }
}
