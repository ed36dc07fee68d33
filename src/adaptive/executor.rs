//! # Stage: Adaptive Executor
//!
//! ## Responsibility
//! Runs one opaque async operation under its circuit breaker, the selected
//! strategy and the retry policy, then records the outcome into the breaker,
//! the learning controller and the metrics collector.
//!
//! ```text
//!  execute(name, op)
//!      │
//!      ├─ breaker.try_acquire() ── Err ──► fallback / CircuitOpen   (nothing recorded)
//!      │
//!      ├─ learning.select(name) ─► Selection
//!      │
//!      └─ loop attempt 1..=max_attempts
//!            op(Invocation) [timeout?] ─► breaker.record_outcome(permit)
//!            ok ─► finish(success)         err ─► backoff, re-acquire
//!                                          exhausted ─► finish(failure)
//! ```
//!
//! ## Guarantees
//! - The breaker sees every attempt; learning and metrics see the final outcome once
//! - A dropped (cancelled) execution is recorded as a failure, at most once
//! - The caller always gets the last operation error, never a bookkeeping error
//! - Backoff sleep is the only suspension point besides the operation itself
//!
//! ## NOT Responsible For
//! - Classifying operation errors beyond success / failure
//! - Sampling decisions (see [`crate::sampling`])

use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit},
    learning::{LearningController, SelectedStrategy, Selection},
    retry::RetryConfig,
};
use crate::{
    config::CoreConfig,
    error::{ExecutionError, ValidationError},
    metrics::MetricsCollector,
};

// ---------------------------------------------------------------------------
// Invocation / report
// ---------------------------------------------------------------------------

/// What the wrapped operation is told about the attempt it is running.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub operation: String,
    pub context: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub strategy: Option<SelectedStrategy>,
}

impl Invocation {
    /// Parameters of the selected strategy, if any.
    pub fn params(&self) -> Option<&Value> {
        self.strategy.as_ref().map(|s| &s.params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Operation,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport<T> {
    pub value: T,
    /// Attempts made; 0 when the breaker refused the call.
    pub attempts: u32,
    pub strategy_id: Option<String>,
    pub elapsed: Duration,
    pub source: ResultSource,
}

// ---------------------------------------------------------------------------
// Outcome guard
// ---------------------------------------------------------------------------

/// Records the final outcome exactly once: explicitly through `finish`, or as
/// a failure from `Drop` when the execution future is cancelled.
struct OutcomeGuard<'a> {
    executor: &'a AdaptiveExecutor,
    breaker: Arc<CircuitBreaker>,
    name: &'a str,
    selection: Selection,
    request_id: String,
    started: Instant,
    /// Permit of the attempt currently running, if any.
    in_flight: Option<Permit>,
    armed: bool,
}

impl<'a> OutcomeGuard<'a> {
    fn new(executor: &'a AdaptiveExecutor, breaker: Arc<CircuitBreaker>, name: &'a str, selection: Selection) -> Self {
        let request_id = Uuid::new_v4().to_string();
        executor.metrics.record_request_start(name, &request_id);
        Self {
            executor,
            breaker,
            name,
            selection,
            request_id,
            started: Instant::now(),
            in_flight: None,
            armed: true,
        }
    }

    fn finish(&mut self, success: bool) -> Duration {
        let elapsed = self.started.elapsed();
        if std::mem::replace(&mut self.armed, false) {
            self.executor.learning.record_execution(&self.selection, success, elapsed.as_secs_f64());
            self.executor
                .metrics
                .record_request_execution(self.name, &self.request_id, elapsed, success, 0.0, 0.0);
        }
        elapsed
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(permit) = self.in_flight.take() {
            self.breaker.record_failure(permit);
        }
        debug!(operation = self.name, "execution cancelled; recording failure");
        self.finish(false);
    }
}

enum LastFailure<E> {
    Error(E),
    Timeout(Duration),
}

/// A failed run plus the strategy it ran under.
struct Failed<E> {
    error: ExecutionError<E>,
    strategy_id: Option<String>,
}


// ---------------------------------------------------------------------------
// AdaptiveExecutor
// ---------------------------------------------------------------------------

/// Executes operations with breaker protection, strategy selection and retry.
///
/// # Example
/// ```ignore
/// let exec = AdaptiveExecutor::from_config(&CoreConfig::default())?;
/// let report = exec
///     .execute("summarize", |inv| async move { call_model(inv.params()).await })
///     .await?;
/// ```
#[derive(Debug)]
pub struct AdaptiveExecutor {
    metrics: Arc<MetricsCollector>,
    learning: Arc<LearningController>,
    breaker_config: CircuitBreakerConfig,
    retry: RetryConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl AdaptiveExecutor {
    pub fn new(
        metrics: Arc<MetricsCollector>,
        learning: Arc<LearningController>,
        breaker_config: CircuitBreakerConfig,
        retry: RetryConfig,
    ) -> Result<Self, ValidationError> {
        breaker_config.validate()?;
        retry.validate()?;
        Ok(Self { metrics, learning, breaker_config, retry, breakers: RwLock::new(HashMap::new()) })
    }

    /// Build an executor with its own collector and controller.
    pub fn from_config(config: &CoreConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Self::new(
            Arc::new(MetricsCollector::new(config.metrics.clone())),
            Arc::new(LearningController::new(config.learning.clone())?),
            config.circuit_breaker.clone(),
            config.retry.clone(),
        )
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> { &self.metrics }

    pub fn learning(&self) -> &Arc<LearningController> { &self.learning }

    pub fn retry_config(&self) -> &RetryConfig { &self.retry }

    /// The breaker guarding `name`, created on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return Arc::clone(b);
        }
        let mut map = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(name.to_string()).or_insert_with(|| {
            // Config was validated in `new`.
            Arc::new(CircuitBreaker::from_validated(name, self.breaker_config.clone()))
        }))
    }

    /// Stats for every known breaker, sorted by name.
    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Run `op` under the breaker for `name`, retrying failures.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, op: F) -> Result<ExecutionReport<T>, ExecutionError<E>>
    where
        F: Fn(Invocation) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(name, op).await.map_err(|f| f.error)
    }

    /// Like [`execute`](Self::execute), but a refused call or exhausted
    /// retries produce `fallback(&error)` instead of an error. The report
    /// keeps the id of the strategy that failed; a refused call has none.
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(
        &self,
        name: &str,
        op: F,
        fallback: FB,
    ) -> ExecutionReport<T>
    where
        F: Fn(Invocation) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        FB: FnOnce(&ExecutionError<E>) -> T,
    {
        let started = Instant::now();
        match self.run(name, op).await {
            Ok(report) => report,
            Err(Failed { error, strategy_id }) => {
                debug!(operation = name, error = %ErrorDisplay(&error), "serving fallback");
                ExecutionReport {
                    value: fallback(&error),
                    attempts: error.attempts(),
                    strategy_id,
                    elapsed: started.elapsed(),
                    source: ResultSource::Fallback,
                }
            }
        }
    }

    async fn run<T, E, F, Fut>(&self, name: &str, op: F) -> Result<ExecutionReport<T>, Failed<E>>
    where
        F: Fn(Invocation) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let breaker = self.breaker(name);
        let mut permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => return Err(Failed { error: ExecutionError::CircuitOpen(open), strategy_id: None }),
        };

        let selection = self.learning.select(name);
        let strategy_id = selection.strategy_id().map(str::to_string);
        let mut guard = OutcomeGuard::new(self, Arc::clone(&breaker), name, selection);
        let max_attempts = self.retry.max_attempts.max(1);
        let timeout = self.retry.attempt_timeout();

        let mut attempt = 0;
        let last = loop {
            attempt += 1;
            let invocation = Invocation {
                operation: name.to_string(),
                context: guard.selection.context.clone(),
                attempt,
                strategy: guard.selection.strategy.clone(),
            };

            guard.in_flight = Some(permit);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, op(invocation)).await {
                    Ok(r) => r.map_err(LastFailure::Error),
                    Err(_) => Err(LastFailure::Timeout(limit)),
                },
                None => op(invocation).await.map_err(LastFailure::Error),
            };
            guard.in_flight = None;
            breaker.record_outcome(permit, result.is_ok());

            let failure = match result {
                Ok(value) => {
                    let elapsed = guard.finish(true);
                    return Ok(ExecutionReport {
                        value,
                        attempts: attempt,
                        strategy_id,
                        elapsed,
                        source: ResultSource::Operation,
                    });
                }
                Err(f) => f,
            };

            if attempt >= max_attempts {
                break failure;
            }
            if breaker.state() == CircuitState::Open {
                debug!(operation = name, attempt, "circuit opened; abandoning retries");
                break failure;
            }
            let delay = self.retry.backoff(attempt);
            match &failure {
                LastFailure::Error(e) => debug!(operation = name, attempt, error = %e, ?delay, "attempt failed; retrying"),
                LastFailure::Timeout(t) => debug!(operation = name, attempt, timeout = ?t, ?delay, "attempt timed out; retrying"),
            }
            tokio::time::sleep(delay).await;
            match breaker.try_acquire() {
                Ok(next) => permit = next,
                Err(_) => {
                    debug!(operation = name, attempt, "circuit refused retry");
                    break failure;
                }
            }
        };

        guard.finish(false);
        warn!(operation = name, attempts = attempt, "operation failed");
        let error = match last {
            LastFailure::Error(source) => ExecutionError::Operation { attempts: attempt, source },
            LastFailure::Timeout(timeout) => ExecutionError::TimedOut { attempts: attempt, timeout },
        };
        Err(Failed { error, strategy_id })
    }
}

/// Formats an `ExecutionError<E>` with only `E: Display` in scope.
struct ErrorDisplay<'a, E>(&'a ExecutionError<E>);

impl<E: Display> Display for ErrorDisplay<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ExecutionError::CircuitOpen(e) => write!(f, "{e}"),
            ExecutionError::Operation { attempts, source } => write!(f, "failed after {attempts} attempt(s): {source}"),
            ExecutionError::TimedOut { attempts, timeout } => write!(f, "timed out after {attempts} attempt(s) of {timeout:?}"),
        }
    }
}
