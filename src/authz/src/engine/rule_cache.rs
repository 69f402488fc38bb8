//! Rules cache with immutable snapshots and atomic swap on refresh
//!
//! A [`RuleSnapshot`] holds two indices built once from the raw rule list:
//!
//! - **exact**: `"METHOD|PATH"` → rules, for wildcard-free paths
//! - **patterns**: `METHOD` → segment count → rules, for paths with `*`
//!
//! [`RuleCache`] publishes snapshots behind a reader-writer lock. Readers hold
//! the read lock only while indexing one snapshot; a refresh fetches and
//! builds without any lock and takes the write lock only to swap the `Arc`.

use crate::error::{AuthzError, Result};
use crate::matcher;
use crate::rule::{index_key, CacheInvalidator, Rule, RuleStore};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Minimum delay between lazy refresh attempts after a failed fetch
pub const FAILED_REFRESH_BACKOFF: Duration = Duration::from_secs(1);

/// Receives rules cache refresh outcomes
#[async_trait]
pub trait RefreshObserver: Send + Sync {
    /// A new snapshot was published
    async fn refresh_succeeded(&self, _generation: u64, _rule_count: usize) {}

    /// The store fetch failed; the previous snapshot is still served
    async fn refresh_failed(&self, _error: &AuthzError) {}

    /// The store returned zero rules; every endpoint now denies
    async fn empty_rule_set(&self, _tenant: Option<&str>) {}
}

fn normalize_method(method: &str) -> Cow<'_, str> {
    if method.bytes().any(|b| b.is_ascii_lowercase()) {
        Cow::Owned(method.to_ascii_uppercase())
    } else {
        Cow::Borrowed(method)
    }
}

fn insert_rule(bucket: &mut Vec<Arc<Rule>>, rule: Arc<Rule>) {
    match bucket.iter_mut().find(|existing| existing.same_identity(&rule)) {
        Some(existing) => *existing = rule,
        None => bucket.push(rule),
    }
}

/// Immutable pair of lookup indices
#[derive(Debug)]
pub struct RuleSnapshot {
    exact: HashMap<String, Vec<Arc<Rule>>>,
    patterns: HashMap<String, HashMap<usize, Vec<Arc<Rule>>>>,
    generation: u64,
    built_at: Instant,
    rule_count: usize,
}

impl RuleSnapshot {
    /// Snapshot with no rules; every lookup is empty
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: HashMap::new(),
            generation: 0,
            built_at: Instant::now(),
            rule_count: 0,
        }
    }

    /// Build both indices from a rule list.
    ///
    /// Invalid rules are skipped. A rule whose identity (method, path, tenant)
    /// repeats an earlier one replaces it.
    pub fn build(rules: Vec<Rule>, generation: u64) -> Self {
        let mut exact: HashMap<String, Vec<Arc<Rule>>> = HashMap::new();
        let mut patterns: HashMap<String, HashMap<usize, Vec<Arc<Rule>>>> = HashMap::new();

        for mut rule in rules {
            rule.method = rule.method.to_ascii_uppercase();
            if let Err(e) = rule.validate() {
                warn!(generation, "Skipping rule: {}", e);
                continue;
            }

            if rule.has_wildcard() {
                let segments = matcher::count_segments(&rule.path);
                let bucket = patterns
                    .entry(rule.method.clone())
                    .or_default()
                    .entry(segments)
                    .or_default();
                insert_rule(bucket, Arc::new(rule));
            } else {
                let bucket = exact.entry(rule.id()).or_default();
                insert_rule(bucket, Arc::new(rule));
            }
        }

        let rule_count = exact.values().map(Vec::len).sum::<usize>()
            + patterns
                .values()
                .flat_map(|by_count| by_count.values())
                .map(Vec::len)
                .sum::<usize>();

        Self {
            exact,
            patterns,
            generation,
            built_at: Instant::now(),
            rule_count,
        }
    }

    /// Rules matching a request.
    ///
    /// A non-empty exact entry is returned as-is and pattern rules are not
    /// consulted, even if one would also match.
    pub fn lookup(&self, method: &str, path: &str) -> Vec<Arc<Rule>> {
        let method = normalize_method(method);

        if let Some(rules) = self.exact.get(&index_key(&method, path)) {
            if !rules.is_empty() {
                return rules.clone();
            }
        }

        let Some(by_count) = self.patterns.get(method.as_ref()) else {
            return Vec::new();
        };
        let Some(candidates) = by_count.get(&matcher::count_segments(path)) else {
            return Vec::new();
        };

        candidates
            .iter()
            .filter(|rule| matcher::matches(&rule.path, path))
            .cloned()
            .collect()
    }

    /// Generation number; 0 for a snapshot not built from the store
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the snapshot was built
    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    /// Number of indexed rules
    pub fn len(&self) -> usize {
        self.rule_count
    }

    /// Whether the snapshot indexes no rules
    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }

    /// Number of exact-index keys
    pub fn exact_keys(&self) -> usize {
        self.exact.len()
    }

    /// Number of rules in the pattern index
    pub fn pattern_rules(&self) -> usize {
        self.patterns
            .values()
            .flat_map(|by_count| by_count.values())
            .map(Vec::len)
            .sum()
    }
}

/// Snapshot statistics
#[derive(Debug, Clone)]
pub struct SnapshotStats {
    pub generation: u64,
    pub rule_count: usize,
    pub exact_keys: usize,
    pub pattern_rules: usize,
    pub age: Duration,
    pub loaded: bool,
}

/// Rules cache with TTL and manual invalidation
pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    tenant: Option<String>,
    ttl: Duration,
    snapshot: RwLock<Arc<RuleSnapshot>>,
    loaded: AtomicBool,
    dirty: AtomicBool,
    generation: AtomicU64,
    retry_not_before: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
    observer: Option<Arc<dyn RefreshObserver>>,
}

impl RuleCache {
    /// Create an empty cache; the first lookup fetches from the store
    pub fn new(store: Arc<dyn RuleStore>, tenant: Option<String>, ttl: Duration) -> Self {
        Self {
            store,
            tenant,
            ttl,
            snapshot: RwLock::new(Arc::new(RuleSnapshot::empty())),
            loaded: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            retry_not_before: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            observer: None,
        }
    }

    /// Create a cache preloaded with rules, skipping the initial fetch.
    ///
    /// The store is consulted again only after TTL expiry or invalidation.
    pub fn with_snapshot(
        store: Arc<dyn RuleStore>,
        tenant: Option<String>,
        ttl: Duration,
        rules: Vec<Rule>,
    ) -> Self {
        let cache = Self::new(store, tenant, ttl);
        let generation = cache.next_generation();
        *cache.snapshot.write() = Arc::new(RuleSnapshot::build(rules, generation));
        cache.loaded.store(true, Ordering::SeqCst);
        cache
    }

    /// Report refresh outcomes to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Rules matching a request, refreshing first when stale
    pub async fn lookup(&self, method: &str, path: &str) -> Vec<Arc<Rule>> {
        self.ensure_fresh().await;
        self.lookup_current(method, path)
    }

    /// Rules matching a request in the currently published snapshot
    pub fn lookup_current(&self, method: &str, path: &str) -> Vec<Arc<Rule>> {
        let snapshot = self.snapshot.read();
        snapshot.lookup(method, path)
    }

    /// Currently published snapshot
    pub fn current(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Force the next access to rebuild
    pub fn invalidate(&self) {
        debug!("Rules cache invalidated");
        self.dirty.store(true, Ordering::SeqCst);
        *self.retry_not_before.lock() = None;
    }

    /// Fetch all rules and publish a new snapshot.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// reported to the observer before being returned.
    pub async fn refresh(&self) -> Result<u64> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Snapshot statistics
    pub fn stats(&self) -> SnapshotStats {
        let snapshot = self.current();
        SnapshotStats {
            generation: snapshot.generation(),
            rule_count: snapshot.len(),
            exact_keys: snapshot.exact_keys(),
            pattern_rules: snapshot.pattern_rules(),
            age: snapshot.built_at().elapsed(),
            loaded: self.loaded.load(Ordering::SeqCst),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn needs_refresh(&self) -> bool {
        if let Some(not_before) = *self.retry_not_before.lock() {
            if Instant::now() < not_before {
                return false;
            }
        }

        if !self.loaded.load(Ordering::SeqCst) || self.dirty.load(Ordering::SeqCst) {
            return true;
        }

        self.snapshot.read().built_at().elapsed() >= self.ttl
    }

    async fn ensure_fresh(&self) {
        if !self.needs_refresh() {
            return;
        }

        if self.loaded.load(Ordering::SeqCst) {
            // Someone else is refreshing: serve the current snapshot meanwhile
            let Ok(_guard) = self.refresh_lock.try_lock() else {
                return;
            };
            if self.needs_refresh() {
                let _ = self.refresh_locked().await;
            }
        } else {
            let _guard = self.refresh_lock.lock().await;
            if self.needs_refresh() {
                let _ = self.refresh_locked().await;
            }
        }
    }

    async fn refresh_locked(&self) -> Result<u64> {
        let was_dirty = self.dirty.swap(false, Ordering::SeqCst);
        let tenant = self.tenant.as_deref();

        let rules = match self.store.fetch_all_visible_rules(tenant).await {
            Ok(rules) => rules,
            Err(e) => {
                if was_dirty {
                    self.dirty.store(true, Ordering::SeqCst);
                }
                *self.retry_not_before.lock() = Some(Instant::now() + FAILED_REFRESH_BACKOFF);

                let generation = self.current().generation();
                error!(
                    tenant = tenant.unwrap_or("-"),
                    generation,
                    "Failed to load rules, keeping previous snapshot: {}",
                    e
                );
                if let Some(observer) = &self.observer {
                    observer.refresh_failed(&e).await;
                }
                return Err(e);
            }
        };

        if rules.is_empty() {
            warn!(
                tenant = tenant.unwrap_or("-"),
                "Rule store returned no rules; every endpoint will be denied. \
                 Check that routes were synced and the tenant name matches"
            );
            if let Some(observer) = &self.observer {
                observer.empty_rule_set(tenant).await;
            }
        }

        let generation = self.next_generation();
        let snapshot = Arc::new(RuleSnapshot::build(rules, generation));
        let rule_count = snapshot.len();

        *self.snapshot.write() = snapshot;
        self.loaded.store(true, Ordering::SeqCst);
        *self.retry_not_before.lock() = None;

        info!(generation, rule_count, "Rules cache refreshed");
        if let Some(observer) = &self.observer {
            observer.refresh_succeeded(generation, rule_count).await;
        }

        Ok(generation)
    }
}

impl CacheInvalidator for RuleCache {
    fn invalidate_rules_cache(&self) {
        self.invalidate();
    }
}
