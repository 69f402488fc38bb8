//! Prometheus-style metrics for decisions and rules cache refreshes

use super::decision::{Decision, DenyKind};
use super::rule_cache::RefreshObserver;
use crate::error::AuthzError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Engine performance metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of authorization requests
    pub total_requests: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions
    pub denied_decisions: u64,

    /// Denials by category
    pub denials_by_kind: HashMap<DenyKind, u64>,

    /// Successful rules cache refreshes
    pub refreshes: u64,

    /// Failed rules cache refreshes (store unavailable)
    pub refresh_failures: u64,

    /// Refreshes that returned zero rules
    pub empty_refreshes: u64,

    /// Rule count of the last published snapshot
    pub last_rule_count: usize,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Requests that failed with an engine error
    pub error_count: u64,
}

impl EngineMetrics {
    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }

    /// Denials of one category
    pub fn denials(&self, kind: DenyKind) -> u64 {
        self.denials_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

const DENY_KINDS: [DenyKind; 4] = [
    DenyKind::NoRuleFound,
    DenyKind::AuthenticationRequired,
    DenyKind::Forbidden,
    DenyKind::UnknownRoleContext,
];

const DEFAULT_MAX_SAMPLES: usize = 10_000;

fn kind_index(kind: DenyKind) -> usize {
    match kind {
        DenyKind::NoRuleFound => 0,
        DenyKind::AuthenticationRequired => 1,
        DenyKind::Forbidden => 2,
        DenyKind::UnknownRoleContext => 3,
    }
}

/// Metrics collector with Prometheus-compatible export
///
/// Recording only bumps counters and appends to a bounded sample window.
/// Averages and percentiles are computed when metrics are read.
pub struct MetricsCollector {
    total_requests: AtomicU64,
    allowed_decisions: AtomicU64,
    denied_decisions: AtomicU64,
    denials_by_kind: [AtomicU64; 4],
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    empty_refreshes: AtomicU64,
    last_rule_count: AtomicUsize,
    error_count: AtomicU64,

    /// Most recent latency samples in milliseconds, oldest first
    latency_samples: Mutex<VecDeque<f64>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAMPLES)
    }

    /// Create a collector that keeps at most `max_samples` latency samples
    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            total_requests: AtomicU64::new(0),
            allowed_decisions: AtomicU64::new(0),
            denied_decisions: AtomicU64::new(0),
            denials_by_kind: Default::default(),
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            empty_refreshes: AtomicU64::new(0),
            last_rule_count: AtomicUsize::new(0),
            error_count: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::with_capacity(max_samples)),
            max_samples,
        }
    }

    /// Record an authorization decision
    pub fn record_decision(&self, decision: &Decision) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match decision.deny_kind() {
            None => {
                self.allowed_decisions.fetch_add(1, Ordering::Relaxed);
            }
            Some(kind) => {
                self.denied_decisions.fetch_add(1, Ordering::Relaxed);
                self.denials_by_kind[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record request latency
    pub fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.lock();
        if samples.len() == self.max_samples {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    /// Record an engine error
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of latency samples currently held
    pub fn sample_count(&self) -> usize {
        self.latency_samples.lock().len()
    }

    /// Get current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        let mut sorted: Vec<f64> = self.latency_samples.lock().iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let avg_latency_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        let denials_by_kind = DENY_KINDS
            .iter()
            .map(|&kind| {
                let count = self.denials_by_kind[kind_index(kind)].load(Ordering::Relaxed);
                (kind, count)
            })
            .filter(|&(_, count)| count > 0)
            .collect();

        EngineMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_decisions: self.allowed_decisions.load(Ordering::Relaxed),
            denied_decisions: self.denied_decisions.load(Ordering::Relaxed),
            denials_by_kind,
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            empty_refreshes: self.empty_refreshes.load(Ordering::Relaxed),
            last_rule_count: self.last_rule_count.load(Ordering::Relaxed),
            latency_p50_ms: Self::percentile(&sorted, 0.50),
            latency_p99_ms: Self::percentile(&sorted, 0.99),
            avg_latency_ms,
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        let counters = [
            &self.total_requests,
            &self.allowed_decisions,
            &self.denied_decisions,
            &self.refreshes,
            &self.refresh_failures,
            &self.empty_refreshes,
            &self.error_count,
        ];
        for counter in counters.into_iter().chain(self.denials_by_kind.iter()) {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_rule_count.store(0, Ordering::Relaxed);
        self.latency_samples.lock().clear();
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        let mut denials = String::new();
        for kind in DENY_KINDS {
            denials.push_str(&format!(
                "routegate_denied_total{{reason=\"{}\"}} {}\n",
                kind.label(),
                metrics.denials(kind)
            ));
        }

        format!(
            r#"# HELP routegate_requests_total Total number of authorization requests
# TYPE routegate_requests_total counter
routegate_requests_total {}

# HELP routegate_allowed_total Number of allowed decisions
# TYPE routegate_allowed_total counter
routegate_allowed_total {}

# HELP routegate_denied_total Number of denied decisions by reason
# TYPE routegate_denied_total counter
{}
# HELP routegate_rule_refreshes_total Rules cache refreshes by outcome
# TYPE routegate_rule_refreshes_total counter
routegate_rule_refreshes_total{{outcome="success"}} {}
routegate_rule_refreshes_total{{outcome="failure"}} {}
routegate_rule_refreshes_total{{outcome="empty"}} {}

# HELP routegate_rules Rules in the published snapshot
# TYPE routegate_rules gauge
routegate_rules {}

# HELP routegate_latency_seconds Decision latency percentiles
# TYPE routegate_latency_seconds summary
routegate_latency_seconds{{quantile="0.5"}} {}
routegate_latency_seconds{{quantile="0.99"}} {}

# HELP routegate_errors_total Engine errors
# TYPE routegate_errors_total counter
routegate_errors_total {}
"#,
            metrics.total_requests,
            metrics.allowed_decisions,
            denials,
            metrics.refreshes,
            metrics.refresh_failures,
            metrics.empty_refreshes,
            metrics.last_rule_count,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshObserver for MetricsCollector {
    async fn refresh_succeeded(&self, _generation: u64, rule_count: usize) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.last_rule_count.store(rule_count, Ordering::Relaxed);
    }

    async fn refresh_failed(&self, _error: &AuthzError) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    async fn empty_rule_set(&self, _tenant: Option<&str>) {
        self.empty_refreshes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::decision::{AccessRequest, DecisionReason};

    #[test]
    fn test_record_decision() {
        let collector = MetricsCollector::new();
        let request = AccessRequest::new("GET", "/a");

        collector.record_decision(&Decision::allow(
            &request,
            DecisionReason::PublicRule { rule_id: "GET|/a".to_string() },
        ));
        collector.record_decision(&Decision::deny(&request, DecisionReason::NoRuleFound));
        collector.record_decision(&Decision::deny(&request, DecisionReason::NoRuleFound));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.allowed_decisions, 1);
        assert_eq!(metrics.denials(DenyKind::NoRuleFound), 2);
        assert_eq!(metrics.denials(DenyKind::Forbidden), 0);
    }

    #[tokio::test]
    async fn test_refresh_observer() {
        let collector = MetricsCollector::new();

        collector.refresh_succeeded(1, 12).await;
        collector
            .refresh_failed(&AuthzError::StoreUnavailable("down".to_string()))
            .await;
        collector.empty_rule_set(None).await;

        let metrics = collector.get_metrics();
        assert_eq!(metrics.refreshes, 1);
        assert_eq!(metrics.refresh_failures, 1);
        assert_eq!(metrics.empty_refreshes, 1);
        assert_eq!(metrics.last_rule_count, 12);
    }

    #[test]
    fn test_record_latency() {
        let collector = MetricsCollector::new();

        collector.record_latency(Duration::from_millis(5));
        collector.record_latency(Duration::from_millis(10));
        collector.record_latency(Duration::from_millis(15));

        let metrics = collector.get_metrics();
        assert!((metrics.avg_latency_ms - 10.0).abs() < 1.0);
        assert!(metrics.latency_p99_ms >= metrics.latency_p50_ms);
    }

    #[test]
    fn test_percentiles_computed_on_read() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.get_metrics().latency_p99_ms, 0.0);

        // Samples are kept in arrival order and only sorted for a snapshot
        for ms in [30, 10, 20] {
            collector.record_latency(Duration::from_millis(ms));
        }

        let metrics = collector.get_metrics();
        assert!((metrics.latency_p50_ms - 20.0).abs() < 1e-9);
        assert!((metrics.latency_p99_ms - 30.0).abs() < 1e-9);
        assert!((metrics.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::with_capacity(3);

        collector.record_latency(Duration::from_millis(500));
        for ms in [1, 2, 3] {
            collector.record_latency(Duration::from_millis(ms));
        }

        assert_eq!(collector.sample_count(), 3);
        let metrics = collector.get_metrics();
        assert!((metrics.latency_p99_ms - 3.0).abs() < 1e-9, "oldest sample evicted");
    }

    #[test]
    fn test_concurrent_recording() {
        let collector = MetricsCollector::with_capacity(100);
        let request = AccessRequest::new("GET", "/a");
        let decision = Decision::deny(&request, DecisionReason::NoRuleFound);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        collector.record_decision(&decision);
                        collector.record_latency(Duration::from_micros(50));
                    }
                });
            }
        });

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_requests, 1000);
        assert_eq!(metrics.denials(DenyKind::NoRuleFound), 1000);
        assert_eq!(collector.sample_count(), 100);
    }

    #[tokio::test]
    async fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        let request = AccessRequest::new("GET", "/a");
        collector.record_decision(&Decision::deny(&request, DecisionReason::AuthenticationRequired));
        collector.refresh_succeeded(1, 4).await;

        let prometheus = collector.export_prometheus();
        assert!(prometheus.contains("routegate_requests_total 1"));
        assert!(prometheus.contains("routegate_denied_total{reason=\"authentication_required\"} 1"));
        assert!(prometheus.contains("routegate_rule_refreshes_total{outcome=\"success\"} 1"));
        assert!(prometheus.contains("routegate_rules 4"));
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record_error();
        collector.record_latency(Duration::from_millis(1));
        collector.reset();

        assert_eq!(collector.get_metrics().error_count, 0);
        assert_eq!(collector.sample_count(), 0);
    }
}
