//! # Stage: Metrics Collector
//!
//! ## Responsibility
//! Owns one bundle of {percentile, SLO, throughput, cost} trackers per
//! operation name and fans every recorded execution out to all four, then to
//! the injected [`MetricsSink`].
//!
//! ## Guarantees
//! - Thread-safe: `Send + Sync`; safe under unbounded concurrent callers
//! - Fine-grained locking: the name map is write-locked only on the first sight
//!   of a name; every tracker in a bundle has its own mutex
//! - Lazy: bundles are created on first reference and live until `reset`
//! - Non-masking: a sink failure is logged and never reaches the caller
//!
//! ## NOT Responsible For
//! - Exposition formats (callers serialize [`OperationSnapshot`] themselves)
//! - Deciding whether telemetry is kept (that is the sampling module)

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    cost::{CostStats, CostTracker, DEFAULT_CATEGORY},
    percentile::{PercentileTracker, Percentiles, DEFAULT_MAX_SAMPLES},
    sink::{ExecutionEvent, MetricsSink, NoopSink},
    slo::{SloConfig, SloStatus, SloTracker},
    throughput::{ThroughputStats, ThroughputTracker},
};
use crate::error::{saturating_duration, ValidationError};

// ---------------------------------------------------------------------------
// MetricsConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every bundle the collector creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Reservoir size of each percentile tracker.
    pub percentile_capacity: usize,
    /// Rolling window of each throughput tracker.
    pub throughput_window_seconds: f64,
    /// SLO used for names without an explicit `configure_slo`.
    pub default_slo: SloConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            percentile_capacity: DEFAULT_MAX_SAMPLES,
            throughput_window_seconds: 60.0,
            default_slo: SloConfig::default(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.percentile_capacity == 0 {
            return Err(ValidationError::NotPositive { field: "metrics.percentile_capacity", value: 0.0 });
        }
        ValidationError::check_positive("metrics.throughput_window_seconds", self.throughput_window_seconds)?;
        ValidationError::check_duration("metrics.throughput_window_seconds", self.throughput_window_seconds)?;
        self.default_slo.validate()
    }

    fn throughput_window(&self) -> Duration {
        saturating_duration(self.throughput_window_seconds)
    }
}

// ---------------------------------------------------------------------------
// Per-operation bundle
// ---------------------------------------------------------------------------

/// The four trackers for one operation name.
#[derive(Debug)]
struct OperationMetrics {
    percentiles: Mutex<PercentileTracker>,
    slo: Mutex<SloTracker>,
    throughput: Mutex<ThroughputTracker>,
    cost: Mutex<CostTracker>,
}

impl OperationMetrics {
    fn new(name: &str, cfg: &MetricsConfig, slo: SloConfig) -> Self {
        Self {
            percentiles: Mutex::new(PercentileTracker::new(name, cfg.percentile_capacity)),
            slo: Mutex::new(SloTracker::new(slo)),
            throughput: Mutex::new(ThroughputTracker::new(cfg.throughput_window())),
            cost: Mutex::new(CostTracker::new()),
        }
    }

    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            percentiles: self.percentiles.lock().unwrap_or_else(PoisonError::into_inner).get_percentiles(),
            slo: self.slo.lock().unwrap_or_else(PoisonError::into_inner).get_slo_status(),
            throughput: self.throughput.lock().unwrap_or_else(PoisonError::into_inner).get_stats(),
            cost: self.cost.lock().unwrap_or_else(PoisonError::into_inner).get_stats(),
        }
    }

    fn reset(&self) {
        self.percentiles.lock().unwrap_or_else(PoisonError::into_inner).reset();
        self.slo.lock().unwrap_or_else(PoisonError::into_inner).reset();
        self.throughput.lock().unwrap_or_else(PoisonError::into_inner).reset();
        self.cost.lock().unwrap_or_else(PoisonError::into_inner).reset();
    }
}

/// Point-in-time view of one operation, the export boundary for exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSnapshot {
    pub percentiles: Percentiles,
    pub slo: SloStatus,
    pub throughput: ThroughputStats,
    pub cost: CostStats,
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe facade over per-operation tracker bundles.
///
/// Construct one per test or subsystem with [`MetricsCollector::new`]; use
/// [`global`] only where a process-wide instance is genuinely wanted.
///
/// # Example
/// ```ignore
/// let metrics = MetricsCollector::new(MetricsConfig::default());
/// metrics.record_execution("llm_call", Duration::from_millis(420), true, 0.002, 0.0);
/// let snap = metrics.get_all_metrics(Some("llm_call"));
/// ```
pub struct MetricsCollector {
    config: MetricsConfig,
    operations: RwLock<HashMap<String, Arc<OperationMetrics>>>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsCollector {
    /// Unvalidated config is accepted; out-of-range windows saturate instead
    /// of panicking. Use [`try_new`](Self::try_new) to reject them.
    pub fn new(config: MetricsConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    pub fn with_sink(config: MetricsConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self { config, operations: RwLock::new(HashMap::new()), sink }
    }

    /// Validate `config`, then build a collector around `sink`.
    pub fn try_new(config: MetricsConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::with_sink(config, sink))
    }

    pub fn config(&self) -> &MetricsConfig { &self.config }

    /// Set the SLO for `name`, creating its bundle if needed. Counters are kept.
    pub fn configure_slo(&self, name: &str, slo: SloConfig) {
        let bundle = self.bundle(name);
        bundle.slo.lock().unwrap_or_else(PoisonError::into_inner).set_config(slo);
    }

    /// Hot path: record one finished execution into all four trackers.
    pub fn record_execution(&self, name: &str, duration: Duration, success: bool, cost: f64, savings: f64) {
        self.record_finished(name, None, duration, success, cost, savings);
    }

    /// Record the execution of a request opened with
    /// [`record_request_start`](Self::record_request_start). Throughput counts
    /// it once: the start already did, so this only ends it.
    pub fn record_request_execution(
        &self,
        name: &str,
        request_id: &str,
        duration: Duration,
        success: bool,
        cost: f64,
        savings: f64,
    ) {
        self.record_finished(name, Some(request_id), duration, success, cost, savings);
    }

    fn record_finished(
        &self,
        name: &str,
        request_id: Option<&str>,
        duration: Duration,
        success: bool,
        cost: f64,
        savings: f64,
    ) {
        let bundle = self.bundle(name);
        let seconds = duration.as_secs_f64();

        bundle.percentiles.lock().unwrap_or_else(PoisonError::into_inner).record_latency(seconds);
        bundle.slo.lock().unwrap_or_else(PoisonError::into_inner).record_request(seconds, success);
        {
            let mut throughput = bundle.throughput.lock().unwrap_or_else(PoisonError::into_inner);
            match request_id {
                Some(id) => throughput.record_request_end(id),
                None => throughput.record_completed(),
            }
        }
        if cost != 0.0 || savings != 0.0 {
            let mut tracker = bundle.cost.lock().unwrap_or_else(PoisonError::into_inner);
            if cost != 0.0 {
                tracker.record_cost(cost, DEFAULT_CATEGORY);
            }
            if savings != 0.0 {
                tracker.record_savings(savings, DEFAULT_CATEGORY);
            }
        }

        let event = ExecutionEvent { operation: name.to_string(), duration, success, cost, savings };
        if let Err(e) = self.sink.record(&event) {
            warn!(sink = self.sink.name(), error = %e, "metrics sink failed; execution still recorded");
        }
    }

    pub fn record_request_start(&self, name: &str, request_id: &str) {
        self.bundle(name)
            .throughput
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_request_start(request_id);
    }

    pub fn record_request_end(&self, name: &str, request_id: &str) {
        self.bundle(name)
            .throughput
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_request_end(request_id);
    }

    pub fn record_cost(&self, name: &str, amount: f64, category: &str) {
        self.bundle(name).cost.lock().unwrap_or_else(PoisonError::into_inner).record_cost(amount, category);
    }

    pub fn record_savings(&self, name: &str, amount: f64, category: &str) {
        self.bundle(name).cost.lock().unwrap_or_else(PoisonError::into_inner).record_savings(amount, category);
    }

    /// Snapshot one operation (created lazily) or every known operation.
    pub fn get_all_metrics(&self, name: Option<&str>) -> BTreeMap<String, OperationSnapshot> {
        match name {
            Some(n) => BTreeMap::from([(n.to_string(), self.bundle(n).snapshot())]),
            None => {
                let bundles: Vec<(String, Arc<OperationMetrics>)> = self
                    .operations
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::clone(v)))
                    .collect();
                // Snapshot outside the map lock so recorders are never blocked on it.
                bundles.into_iter().map(|(k, b)| (k, b.snapshot())).collect()
            }
        }
    }

    /// Reset one operation's trackers, or all of them. SLO configs survive.
    pub fn reset(&self, name: Option<&str>) {
        let map = self.operations.read().unwrap_or_else(PoisonError::into_inner);
        match name {
            Some(n) => {
                if let Some(bundle) = map.get(n) {
                    bundle.reset();
                }
            }
            None => map.values().for_each(|b| b.reset()),
        }
    }

    /// Known operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn bundle(&self, name: &str) -> Arc<OperationMetrics> {
        if let Some(b) = self.operations.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return Arc::clone(b);
        }
        let mut map = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(OperationMetrics::new(name, &self.config, self.config.default_slo))),
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self { Self::new(MetricsConfig::default()) }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("operations", &self.operation_names())
            .field("sink", &self.sink.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Process-wide accessor
// ---------------------------------------------------------------------------

static GLOBAL: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::default()));

/// The process-wide collector, created on first use with default config.
pub fn global() -> Arc<MetricsCollector> {
    Arc::clone(&GLOBAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::SinkError, metrics::sink::MemorySink};

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn name(&self) -> &str { "failing" }

        fn record(&self, _event: &ExecutionEvent) -> Result<(), SinkError> {
            Err(SinkError { sink: "failing".into(), reason: "down".into() })
        }
    }

    #[test]
    fn test_record_execution_fans_out() {
        let m = MetricsCollector::default();
        m.record_execution("op", Duration::from_millis(200), true, 0.01, 0.002);
        let snap = &m.get_all_metrics(Some("op"))["op"];
        assert_eq!(snap.slo.total_requests, 1);
        assert_eq!(snap.throughput.total_requests, 1);
        assert!((snap.percentiles.p50 - 0.2).abs() < 1e-9);
        assert_eq!(snap.cost.cost_breakdown[DEFAULT_CATEGORY], 0.01);
        assert_eq!(snap.cost.savings_breakdown[DEFAULT_CATEGORY], 0.002);
    }

    #[test]
    fn test_lazy_bundle_on_query() {
        let m = MetricsCollector::default();
        let all = m.get_all_metrics(Some("fresh"));
        assert_eq!(all["fresh"].slo.total_requests, 0);
        assert_eq!(m.operation_names(), vec!["fresh".to_string()]);
    }

    #[test]
    fn test_configure_slo_applies() {
        let m = MetricsCollector::default();
        m.configure_slo("op", SloConfig::new(0.5, 0.1).unwrap());
        m.record_execution("op", Duration::from_millis(500), true, 0.0, 0.0);
        let snap = &m.get_all_metrics(Some("op"))["op"];
        assert_eq!(snap.slo.latency_violations, 1);
        assert_eq!(snap.slo.target, 0.5);
    }

    #[test]
    fn test_reset_one_keeps_others() {
        let m = MetricsCollector::default();
        m.record_execution("a", Duration::from_millis(1), true, 0.0, 0.0);
        m.record_execution("b", Duration::from_millis(1), true, 0.0, 0.0);
        m.reset(Some("a"));
        let all = m.get_all_metrics(None);
        assert_eq!(all["a"].slo.total_requests, 0);
        assert_eq!(all["b"].slo.total_requests, 1);
    }

    #[test]
    fn test_reset_all_keeps_slo_config() {
        let m = MetricsCollector::default();
        m.configure_slo("a", SloConfig::new(0.9, 2.0).unwrap());
        m.record_execution("a", Duration::from_millis(1), false, 0.0, 0.0);
        m.reset(None);
        let all = m.get_all_metrics(None);
        assert_eq!(all["a"].slo.total_requests, 0);
        assert_eq!(all["a"].slo.target, 0.9);
    }

    #[test]
    fn test_failing_sink_does_not_mask_recording() {
        let m = MetricsCollector::with_sink(MetricsConfig::default(), Arc::new(FailingSink));
        m.record_execution("op", Duration::from_millis(3), false, 0.0, 0.0);
        assert_eq!(m.get_all_metrics(Some("op"))["op"].slo.total_requests, 1);
    }

    #[test]
    fn test_sink_receives_events() {
        let sink = Arc::new(MemorySink::new(10));
        let m = MetricsCollector::with_sink(MetricsConfig::default(), sink.clone());
        m.record_execution("op", Duration::from_millis(3), true, 0.0, 0.0);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "op");
    }

    #[test]
    fn test_request_gauge() {
        let m = MetricsCollector::default();
        m.record_request_start("op", "r1");
        m.record_request_start("op", "r2");
        m.record_request_end("op", "r1");
        assert_eq!(m.get_all_metrics(Some("op"))["op"].throughput.active_requests, 1);
    }

    #[test]
    fn test_concurrent_record_execution() {
        let m = Arc::new(MetricsCollector::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        m.record_execution(&format!("op{}", t % 2), Duration::from_millis(1), true, 0.0, 0.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let all = m.get_all_metrics(None);
        assert_eq!(all["op0"].slo.total_requests + all["op1"].slo.total_requests, 2_000);
    }

    #[test]
    fn test_global_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_config_validation() {
        assert!(MetricsConfig::default().validate().is_ok());
        let bad = MetricsConfig { percentile_capacity: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_try_new_rejects_unrepresentable_window() {
        for throughput_window_seconds in [f64::INFINITY, 1e20, f64::NAN] {
            let cfg = MetricsConfig { throughput_window_seconds, ..Default::default() };
            assert!(MetricsCollector::try_new(cfg, Arc::new(NoopSink)).is_err());
        }
        assert!(MetricsCollector::try_new(MetricsConfig::default(), Arc::new(NoopSink)).is_ok());
    }

    #[test]
    fn test_unvalidated_infinite_window_does_not_panic() {
        let m = MetricsCollector::new(MetricsConfig { throughput_window_seconds: f64::INFINITY, ..Default::default() });
        m.record_execution("op", Duration::from_millis(1), true, 0.0, 0.0);
        let snap = &m.get_all_metrics(Some("op"))["op"];
        assert_eq!(snap.throughput.total_requests, 1);
    }

    #[test]
    fn test_request_execution_counts_throughput_once() {
        let m = MetricsCollector::default();
        m.record_request_start("op", "r1");
        m.record_request_execution("op", "r1", Duration::from_millis(5), true, 0.0, 0.0);
        let snap = &m.get_all_metrics(Some("op"))["op"];
        assert_eq!(snap.throughput.total_requests, 1);
        assert_eq!(snap.throughput.active_requests, 0);
        assert_eq!(snap.throughput.requests_per_second, snap.throughput.completions_per_second);
        assert_eq!(snap.slo.total_requests, 1);
    }
}
