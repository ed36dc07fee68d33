//! # Stage: Circuit Breaker
//!
//! ## Responsibility
//! Failure-rate state machine guarding one operation. Outcomes are kept in a
//! bounded sliding window; when the failure fraction of the window exceeds the
//! configured threshold the breaker opens and callers fail fast until the
//! cooldown elapses, after which exactly one probe is let through.
//!
//! ```text
//!            failures/window > threshold
//!   CLOSED ───────────────────────────────► OPEN
//!     ▲                                     │  ▲
//!     │ probe ok          cooldown elapsed  │  │ probe failed
//!     └──────────── HALF_OPEN ◄─────────────┘  │
//!                       └──────────────────────┘
//! ```
//!
//! ## Guarantees
//! - Non-blocking: the cooldown check is a timestamp comparison
//! - Single probe: while a half-open probe is in flight every other caller is rejected
//! - Stale outcomes are ignored: every admission returns a [`Permit`] stamped
//!   with the breaker generation, and only permits of the current generation
//!   (the probe's, while half-open) move the state machine
//! - Thread-safe: all state sits behind one mutex held only for O(1) work

use std::{
    collections::VecDeque,
    fmt,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{saturating_duration, CircuitOpenError, ValidationError};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Open when `failures / evaluation_window_size` exceeds this fraction.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept in the sliding window.
    pub evaluation_window_size: usize,
    /// Time spent open before a half-open probe is allowed.
    pub cooldown_seconds: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            evaluation_window_size: 10,
            cooldown_seconds: 30.0,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("circuit_breaker.failure_rate_threshold", self.failure_rate_threshold, 0.0, 1.0)?;
        if self.evaluation_window_size == 0 {
            return Err(ValidationError::NotPositive {
                field: "circuit_breaker.evaluation_window_size",
                value: 0.0,
            });
        }
        ValidationError::check_duration("circuit_breaker.cooldown_seconds", self.cooldown_seconds)?;
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        saturating_duration(self.cooldown_seconds)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed   => write!(f, "closed"),
            CircuitState::Open     => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Observable breaker counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub window_failures: usize,
    pub window_len: usize,
    /// Times the breaker has moved into `Open`.
    pub trips: u64,
    /// Calls refused while open or while a probe was in flight.
    pub rejected: u64,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`]; hand it back
/// with the call's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the call's outcome must be recorded with this permit"]
pub struct Permit {
    generation: u64,
    probe: bool,
}

impl Permit {
    /// Whether this permit admitted the half-open probe.
    pub fn is_probe(&self) -> bool { self.probe }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Bumped on every state transition.
    generation: u64,
    window: VecDeque<bool>,
    failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
    rejected: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            window: VecDeque::new(),
            failures: 0,
            opened_at: None,
            probe_in_flight: false,
            trips: 0,
            rejected: 0,
        }
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.failures = 0;
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation += 1;
    }

    fn permit(&self, probe: bool) -> Permit {
        Permit { generation: self.generation, probe }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::from_validated(name, config))
    }

    pub(crate) fn from_validated(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(BreakerState::closed()) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn config(&self) -> &CircuitBreakerConfig { &self.config }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask to run one call.
    ///
    /// Moves `Open → HalfOpen` once the cooldown has elapsed and admits that
    /// caller as the single probe.
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpenError> {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => Ok(s.permit(false)),
            CircuitState::Open => {
                let cooldown = self.config.cooldown();
                let elapsed = s.opened_at.map(|t| t.elapsed()).unwrap_or(cooldown);
                if elapsed >= cooldown {
                    s.transition(CircuitState::HalfOpen);
                    s.probe_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open; admitting probe");
                    Ok(s.permit(true))
                } else {
                    s.rejected += 1;
                    Err(self.open_error(cooldown - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if s.probe_in_flight {
                    s.rejected += 1;
                    Err(self.open_error(Duration::ZERO))
                } else {
                    s.probe_in_flight = true;
                    Ok(s.permit(true))
                }
            }
        }
    }

    pub fn record_success(&self, permit: Permit) {
        self.record_outcome(permit, true);
    }

    pub fn record_failure(&self, permit: Permit) {
        self.record_outcome(permit, false);
    }

    /// Feed back the outcome of a call admitted with `permit`.
    ///
    /// Outcomes of permits issued before the latest transition are dropped,
    /// so a slow call admitted while closed cannot settle a half-open probe.
    pub fn record_outcome(&self, permit: Permit, success: bool) {
        let mut s = self.lock();
        if permit.generation != s.generation {
            debug!(breaker = %self.name, "ignoring outcome from an earlier circuit generation");
            return;
        }
        match s.state {
            CircuitState::HalfOpen => {
                if !permit.probe {
                    return;
                }
                s.probe_in_flight = false;
                s.clear_window();
                if success {
                    s.transition(CircuitState::Closed);
                    s.opened_at = None;
                    info!(breaker = %self.name, "probe succeeded; circuit closed");
                } else {
                    s.transition(CircuitState::Open);
                    s.opened_at = Some(Instant::now());
                    s.trips += 1;
                    warn!(breaker = %self.name, "probe failed; circuit re-opened");
                }
            }
            CircuitState::Closed => {
                if s.window.len() >= self.config.evaluation_window_size {
                    if let Some(false) = s.window.pop_front() {
                        s.failures -= 1;
                    }
                }
                s.window.push_back(success);
                if !success {
                    s.failures += 1;
                }
                let rate = s.failures as f64 / self.config.evaluation_window_size as f64;
                if rate > self.config.failure_rate_threshold {
                    s.transition(CircuitState::Open);
                    s.opened_at = Some(Instant::now());
                    s.trips += 1;
                    warn!(
                        breaker = %self.name,
                        failures = s.failures,
                        window = self.config.evaluation_window_size,
                        "failure rate {rate:.2} exceeded threshold; circuit opened"
                    );
                }
            }
            // Unreachable with a current permit; every entry into Open bumps the generation.
            CircuitState::Open => {}
        }
    }

    pub fn stats(&self) -> BreakerStats {
        let s = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: s.state,
            window_failures: s.failures,
            window_len: s.window.len(),
            trips: s.trips,
            rejected: s.rejected,
        }
    }

    /// Force `Closed` with an empty window. Counters are kept.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.transition(CircuitState::Closed);
        s.opened_at = None;
        s.probe_in_flight = false;
        s.clear_window();
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError { operation: self.name.clone(), retry_after }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
