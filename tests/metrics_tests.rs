//! External tests for the metrics module: tracker arithmetic, the collector
//! facade and the export shape.

use std::{sync::Arc, time::Duration};

use adaptive_telemetry::metrics::{
    cost::CostTracker,
    percentile::PercentileTracker,
    sink::MemorySink,
    slo::{SloConfig, SloTracker},
    throughput::ThroughputTracker,
    MetricsCollector, MetricsConfig,
};

// -- Percentiles ----------------------------------------------------------

#[test]
fn test_reservoir_keeps_last_ten_in_order() {
    let mut t = PercentileTracker::new("op", 10);
    for i in 0..20 {
        t.record_latency(i as f64);
    }
    let kept: Vec<f64> = t.samples();
    assert_eq!(kept, (10..20).map(|i| i as f64).collect::<Vec<_>>());
}

#[test]
fn test_nearest_rank_no_interpolation() {
    let mut t = PercentileTracker::new("op", 100);
    for v in [1.0, 2.0, 3.0, 4.0] {
        t.record_latency(v);
    }
    let p = t.get_percentiles();
    // floor(0.5 * 3) = 1, floor(0.9 * 3) = 2
    assert_eq!(p.p50, 2.0);
    assert_eq!(p.p90, 3.0);
    assert_eq!(p.p99, 3.0);
}

#[test]
fn test_empty_percentiles_are_zero() {
    let p = PercentileTracker::new("op", 10).get_percentiles();
    assert_eq!((p.p50, p.p90, p.p95, p.p99), (0.0, 0.0, 0.0, 0.0));
}

// -- SLO ------------------------------------------------------------------

#[test]
fn test_slo_98_fast_2_slow() {
    let mut t = SloTracker::new(SloConfig::new(0.99, 1.0).unwrap());
    for _ in 0..98 {
        t.record_request(0.1, true);
    }
    for _ in 0..2 {
        t.record_request(1.5, true);
    }
    let s = t.get_slo_status();
    assert!((s.latency_compliance - 0.98).abs() < 1e-12);
    assert_eq!(s.availability, 1.0);
    assert!((s.slo_compliance - 0.98).abs() < 1e-12);
    assert_eq!(s.error_budget_remaining, 0.0);
}

#[test]
fn test_slo_budget_partially_spent() {
    let mut t = SloTracker::new(SloConfig::new(0.9, 1.0).unwrap());
    for i in 0..100 {
        t.record_request(0.1, i >= 5);
    }
    // compliance 0.95 with a 0.1 allowance: half the budget left
    assert!((t.get_slo_status().error_budget_remaining - 0.5).abs() < 1e-9);
}

#[test]
fn test_slo_empty_is_fully_compliant() {
    let s = SloTracker::default().get_slo_status();
    assert_eq!(s.latency_compliance, 1.0);
    assert_eq!(s.availability, 1.0);
    assert_eq!(s.error_budget_remaining, 1.0);
}

// -- Throughput -----------------------------------------------------------

#[test]
fn test_throughput_window_expires_but_total_survives() {
    let mut t = ThroughputTracker::new(Duration::from_millis(100));
    t.record_request_start("r1");
    t.record_request_end("r1");
    std::thread::sleep(Duration::from_millis(150));
    let s = t.get_stats();
    assert_eq!(s.requests_per_second, 0.0);
    assert_eq!(s.total_requests, 1);
    assert_eq!(s.active_requests, 0);
}

// -- Cost -----------------------------------------------------------------

#[test]
fn test_cost_savings_rate() {
    let mut t = CostTracker::new();
    t.record_cost(0.006, "llm");
    t.record_savings(0.004, "cache");
    let s = t.get_stats();
    assert!((s.total_cost - 0.006).abs() < 1e-12);
    assert!((s.total_savings - 0.004).abs() < 1e-12);
    assert!((s.net_cost - 0.002).abs() < 1e-12);
    assert!((s.savings_rate - 0.4).abs() < 1e-12);
}

// -- Collector ------------------------------------------------------------

#[test]
fn test_export_shape() {
    let m = MetricsCollector::new(MetricsConfig::default());
    m.record_execution("llm_call", Duration::from_millis(250), true, 0.002, 0.0);
    m.record_cost("llm_call", 0.001, "embedding");
    let json = serde_json::to_value(m.get_all_metrics(None)).unwrap();
    let op = &json["llm_call"];
    for section in ["percentiles", "slo", "throughput", "cost"] {
        assert!(op.get(section).is_some(), "missing {section}");
    }
    assert!(op["percentiles"]["p99"].is_number());
    assert_eq!(op["cost"]["cost_breakdown"]["embedding"], 0.001);
}

#[test]
fn test_independent_collectors_do_not_share_state() {
    let a = MetricsCollector::default();
    let b = MetricsCollector::default();
    a.record_execution("op", Duration::from_millis(1), true, 0.0, 0.0);
    assert!(b.get_all_metrics(None).is_empty());
}

#[test]
fn test_sink_sees_every_execution_across_threads() {
    let sink = Arc::new(MemorySink::new(1_000));
    let m = Arc::new(MetricsCollector::with_sink(MetricsConfig::default(), sink.clone()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    m.record_execution("op", Duration::from_millis(1), true, 0.0, 0.0);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sink.events().len(), 200);
    assert_eq!(m.get_all_metrics(Some("op"))["op"].slo.total_requests, 200);
}
