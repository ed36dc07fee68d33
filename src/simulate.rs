//! # Stage: Simulation
//!
//! ## Responsibility
//! Drives a synthetic operation through the [`AdaptiveExecutor`] and a
//! [`CompositeSampler`] so the whole core can be exercised from the command
//! line, then gathers everything observable into one serializable report.
//!
//! The synthetic operation reads two strategy params, `latency_factor` and
//! `failure_factor`, so trial strategies genuinely perform better or worse
//! than passthrough.
//!
//! ## NOT Responsible For
//! - Exporting the report anywhere but the caller

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    adaptive::{
        learning::DEFAULT_CONTEXT, AdaptiveExecutor, BreakerStats, Invocation, LearningMode, ResultSource, Strategy,
    },
    config::CoreConfig,
    error::saturating_duration,
    metrics::OperationSnapshot,
    sampling::{CompositeSampler, CompositeStats},
};

/// Telemetry overhead attributed to a fully sampled workload, fed to the
/// adaptive head sampler as `head_rate * FULL_SAMPLING_OVERHEAD`.
const FULL_SAMPLING_OVERHEAD: f64 = 0.1;

/// `(latency_factor, failure_factor)` of the trial strategies, cycled.
const CANDIDATE_PROFILES: [(f64, f64); 3] = [(0.6, 0.5), (1.5, 2.0), (0.9, 1.0)];

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSpec {
    pub operation: String,
    pub requests: usize,
    pub failure_rate: f64,
    pub mean_latency_ms: f64,
    pub concurrency: usize,
    pub candidates: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub succeeded: usize,
    pub fell_back: usize,
    pub attempts: u64,
}

impl std::ops::AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.succeeded += rhs.succeeded;
        self.fell_back += rhs.fell_back;
        self.attempts += rhs.attempts;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub operation: String,
    pub mode: LearningMode,
    pub requests: usize,
    pub tally: Tally,
    pub elapsed_ms: f64,
    pub metrics: BTreeMap<String, OperationSnapshot>,
    pub breakers: Vec<BreakerStats>,
    pub strategies: Vec<Strategy>,
    pub decisions_logged: usize,
    pub sampling: CompositeStats,
}

fn factors(inv: &Invocation) -> (f64, f64) {
    let read = |key: &str| inv.params().and_then(|p| p.get(key)).and_then(|v| v.as_f64()).unwrap_or(1.0);
    (read("latency_factor"), read("failure_factor"))
}

/// One attempt of the synthetic operation.
fn synthetic(inv: Invocation, mean_latency_ms: f64, failure_rate: f64) -> impl Future<Output = Result<(), String>> {
    let (latency_factor, failure_factor) = factors(&inv);
    let mut rng = rand::thread_rng();
    let ms = (mean_latency_ms * latency_factor * rng.gen_range(0.5..1.5)).max(0.0);
    let fail = rng.gen::<f64>() < (failure_rate * failure_factor).clamp(0.0, 1.0);
    let attempt = inv.attempt;
    async move {
        tokio::time::sleep(saturating_duration(ms / 1_000.0)).await;
        if fail {
            Err(format!("synthetic failure on attempt {attempt}"))
        } else {
            Ok(())
        }
    }
}

pub async fn run(
    config: CoreConfig,
    spec: SimulationSpec,
) -> Result<SimulationReport, Box<dyn std::error::Error + Send + Sync>> {
    let executor = Arc::new(AdaptiveExecutor::from_config(&config)?);
    let sampler = Arc::new(CompositeSampler::from_config(&config.sampling)?);
    let learning = executor.learning();

    if learning.mode() == LearningMode::Active {
        for (latency_factor, failure_factor) in CANDIDATE_PROFILES.iter().cycle().take(spec.candidates) {
            learning.create_strategy_with_params(
                &spec.operation,
                DEFAULT_CONTEXT,
                json!({ "latency_factor": latency_factor, "failure_factor": failure_factor }),
            )?;
        }
    }

    info!(
        operation = %spec.operation,
        requests = spec.requests,
        concurrency = spec.concurrency,
        mode = %learning.mode(),
        "starting simulation"
    );

    let started = Instant::now();
    let next = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..spec.concurrency.max(1))
        .map(|_| {
            let executor = Arc::clone(&executor);
            let sampler = Arc::clone(&sampler);
            let next = Arc::clone(&next);
            let spec = spec.clone();
            tokio::spawn(async move {
                let mut tally = Tally::default();
                while next.fetch_add(1, Ordering::SeqCst) < spec.requests {
                    let trace_id = Uuid::new_v4().to_string();
                    let overhead = sampler.head_rate() * FULL_SAMPLING_OVERHEAD;
                    sampler.start_trace(Some(&trace_id), Some(overhead));

                    let t0 = Instant::now();
                    let (mean, rate) = (spec.mean_latency_ms, spec.failure_rate);
                    let report = executor
                        .execute_with_fallback(&spec.operation, move |inv| synthetic(inv, mean, rate), |_| ())
                        .await;
                    let failed = report.source == ResultSource::Fallback;
                    sampler.end_trace(Some(&trace_id), failed, t0.elapsed().as_secs_f64() * 1_000.0);

                    tally.attempts += report.attempts as u64;
                    if failed {
                        tally.fell_back += 1;
                    } else {
                        tally.succeeded += 1;
                    }
                }
                tally
            })
        })
        .collect();

    let mut tally = Tally::default();
    for worker in workers {
        tally += worker.await?;
    }

    let learning = executor.learning();
    Ok(SimulationReport {
        operation: spec.operation.clone(),
        mode: learning.mode(),
        requests: spec.requests,
        tally,
        elapsed_ms: started.elapsed().as_secs_f64() * 1_000.0,
        metrics: executor.metrics().get_all_metrics(Some(&spec.operation)),
        breakers: executor.breaker_stats(),
        strategies: learning.strategies(),
        decisions_logged: learning.decisions().len(),
        sampling: sampler.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::RetryConfig;

    fn spec(requests: usize, failure_rate: f64) -> SimulationSpec {
        SimulationSpec {
            operation: "sim".into(),
            requests,
            failure_rate,
            mean_latency_ms: 1.0,
            concurrency: 4,
            candidates: 2,
        }
    }

    fn fast_config() -> CoreConfig {
        let mut cfg = CoreConfig::default();
        cfg.retry = RetryConfig { initial_backoff_ms: 1, max_backoff_ms: 2, ..Default::default() };
        cfg
    }

    #[tokio::test]
    async fn test_every_request_accounted_for() {
        let report = run(fast_config(), spec(40, 0.2)).await.unwrap();
        assert_eq!(report.tally.succeeded + report.tally.fell_back, 40);
        let snap = &report.metrics["sim"];
        // refused calls never reach the collector
        assert!(snap.slo.total_requests <= 40);
        assert_eq!(snap.throughput.active_requests, 0);
        let sampled = report.sampling.sampled + report.sampling.dropped;
        assert_eq!(sampled, 40);
    }

    #[tokio::test]
    async fn test_passive_mode_creates_no_strategies() {
        let report = run(fast_config(), spec(10, 0.0)).await.unwrap();
        assert!(report.strategies.is_empty());
        assert_eq!(report.tally.succeeded, 10);
    }

    #[tokio::test]
    async fn test_active_mode_registers_candidates() {
        let mut cfg = fast_config();
        cfg.learning.mode = LearningMode::Active;
        let report = run(cfg, spec(10, 0.0)).await.unwrap();
        assert_eq!(report.strategies.len(), 2);
        assert_eq!(report.strategies[0].params["latency_factor"], 0.6);
    }

    #[test]
    fn test_report_serializes() {
        let report = SimulationReport {
            operation: "x".into(),
            mode: LearningMode::Passive,
            requests: 0,
            tally: Tally::default(),
            elapsed_ms: 0.0,
            metrics: BTreeMap::new(),
            breakers: vec![],
            strategies: vec![],
            decisions_logged: 0,
            sampling: CompositeSampler::from_config(&Default::default()).unwrap().stats(),
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["mode"], "passive");
        assert!(v["sampling"]["adaptive"].is_null());
    }
}
