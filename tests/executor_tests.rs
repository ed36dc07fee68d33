//! External tests for the adaptive executor: breaker lifecycle through real
//! executions, retry accounting, and strategy learning end to end.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use adaptive_telemetry::{
    adaptive::{
        learning::DEFAULT_CONTEXT, CircuitBreakerConfig, CircuitState, LearningConfig, LearningMode, RejectionReason,
        ResultSource, RetryConfig,
    },
    AdaptiveExecutor, LearningController, MetricsCollector,
};
use serde_json::json;

fn executor(breaker: CircuitBreakerConfig, retry: RetryConfig, learning: LearningConfig) -> AdaptiveExecutor {
    AdaptiveExecutor::new(
        Arc::new(MetricsCollector::default()),
        Arc::new(LearningController::new(learning).unwrap()),
        breaker,
        retry,
    )
    .unwrap()
}

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig { max_attempts, initial_backoff_ms: 1, max_backoff_ms: 4, ..Default::default() }
}

// -- Circuit breaker lifecycle ----------------------------------------------

#[tokio::test]
async fn test_breaker_opens_fails_fast_then_recovers_via_probe() {
    let exec = executor(
        CircuitBreakerConfig { failure_rate_threshold: 0.5, evaluation_window_size: 4, cooldown_seconds: 0.05 },
        quick_retry(1),
        LearningConfig::default(),
    );
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let _ = exec
            .execute("svc", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("boom") }
            })
            .await;
    }
    assert_eq!(exec.breaker("svc").state(), CircuitState::Open);
    let before = calls.load(Ordering::SeqCst);

    let err = exec
        .execute("svc", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(()) }
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), before, "operation must not run while open");

    tokio::time::sleep(Duration::from_millis(70)).await;
    let report = exec.execute("svc", |_| async { Ok::<_, &str>("probe") }).await.unwrap();
    assert_eq!(report.value, "probe");
    let stats = exec.breaker("svc").stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.window_len, 0);
}

#[tokio::test]
async fn test_breakers_are_per_operation() {
    let exec = executor(
        CircuitBreakerConfig { failure_rate_threshold: 0.0, evaluation_window_size: 1, cooldown_seconds: 60.0 },
        quick_retry(1),
        LearningConfig::default(),
    );
    let _ = exec.execute("a", |_| async { Err::<(), _>("down") }).await;
    assert_eq!(exec.breaker("a").state(), CircuitState::Open);
    assert!(exec.execute("b", |_| async { Ok::<_, &str>(1) }).await.is_ok());
    let names: Vec<_> = exec.breaker_stats().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["a", "b"]);
}

// -- Retry accounting --------------------------------------------------------

#[tokio::test]
async fn test_retries_visible_to_breaker_but_recorded_once_elsewhere() {
    let exec = executor(CircuitBreakerConfig::default(), quick_retry(3), LearningConfig::default());
    let report = exec
        .execute("op", |inv| async move { if inv.attempt == 1 { Err("first") } else { Ok(inv.attempt) } })
        .await
        .unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(exec.breaker("op").stats().window_len, 2);
    assert_eq!(exec.breaker("op").stats().window_failures, 1);
    assert_eq!(exec.metrics().get_all_metrics(Some("op"))["op"].slo.total_requests, 1);
    assert_eq!(exec.learning().baseline("op", DEFAULT_CONTEXT).samples, 1);
}

#[tokio::test]
async fn test_fallback_after_exhaustion_reports_attempts() {
    let exec = executor(CircuitBreakerConfig::default(), quick_retry(2), LearningConfig::default());
    let report = exec
        .execute_with_fallback("op", |_| async { Err::<&str, _>("nope") }, |_| "cached")
        .await;
    assert_eq!(report.value, "cached");
    assert_eq!(report.source, ResultSource::Fallback);
    assert_eq!(report.attempts, 2);
}

// -- Learning end to end ------------------------------------------------------

#[tokio::test]
async fn test_better_candidate_gets_adopted() {
    let exec = executor(
        CircuitBreakerConfig::default(),
        quick_retry(1),
        LearningConfig { mode: LearningMode::Active, validation_window: 5, exploration_rate: 1.0, ..Default::default() },
    );
    let learning = exec.learning();

    // Build a passthrough baseline first.
    learning.set_mode(LearningMode::Passive);
    for _ in 0..5 {
        exec.execute("op", |_| async {
            tokio::time::sleep(Duration::from_millis(8)).await;
            Ok::<_, String>(())
        })
        .await
        .unwrap();
    }
    learning.set_mode(LearningMode::Active);

    let id = learning.create_strategy_with_params("op", DEFAULT_CONTEXT, json!({"fast": true})).unwrap();
    for _ in 0..5 {
        exec.execute("op", |inv| async move {
            let fast = inv.params().and_then(|p| p["fast"].as_bool()).unwrap_or(false);
            if !fast {
                tokio::time::sleep(Duration::from_millis(8)).await;
            }
            Ok::<_, String>(())
        })
        .await
        .unwrap();
    }

    let s = learning.strategy(&id).unwrap();
    assert!(s.validated && s.adopted, "{s:?}");
    assert_eq!(learning.adopted("op", DEFAULT_CONTEXT).map(|s| s.id), Some(id));
}

#[tokio::test]
async fn test_failing_candidate_gets_retired_and_passthrough_resumes() {
    let exec = executor(
        CircuitBreakerConfig { evaluation_window_size: 100, ..Default::default() },
        quick_retry(1),
        LearningConfig { mode: LearningMode::Passive, validation_window: 3, exploration_rate: 1.0, ..Default::default() },
    );
    let learning = exec.learning();
    for _ in 0..3 {
        exec.execute("op", |_| async { Ok::<_, String>(()) }).await.unwrap();
    }
    learning.set_mode(LearningMode::Active);
    let id = learning.create_strategy_with_params("op", DEFAULT_CONTEXT, json!({"broken": true})).unwrap();

    for _ in 0..3 {
        let _ = exec
            .execute("op", |inv| async move {
                if inv.params().is_some() { Err("broken strategy".to_string()) } else { Ok(()) }
            })
            .await;
    }

    let s = learning.strategy(&id).unwrap();
    assert!(s.retired);
    let rejection = learning
        .decisions()
        .into_iter()
        .find_map(|d| match d.kind {
            adaptive_telemetry::adaptive::DecisionKind::Validated { outcome } => outcome.reason(),
            _ => None,
        });
    assert_eq!(rejection, Some(RejectionReason::PerformanceRegression));
    assert!(learning.select("op").strategy.is_none());
}

#[tokio::test]
async fn test_open_circuit_does_not_touch_learning() {
    let exec = executor(
        CircuitBreakerConfig { failure_rate_threshold: 0.0, evaluation_window_size: 1, cooldown_seconds: 60.0 },
        quick_retry(1),
        LearningConfig::default(),
    );
    let _ = exec.execute("op", |_| async { Err::<(), _>("down") }).await;
    let before = exec.learning().baseline("op", DEFAULT_CONTEXT).samples;
    let _ = exec.execute("op", |_| async { Ok::<_, &str>(()) }).await;
    assert_eq!(exec.learning().baseline("op", DEFAULT_CONTEXT).samples, before);
}
