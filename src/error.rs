//! Error types for the adaptive execution and telemetry core.
//!
//! Each concern gets its own enum so callers can match on exactly the failures
//! an API can produce. Strategy rejections are *not* errors; they are recorded
//! as [`crate::adaptive::strategy::ValidationOutcome`] values.

use std::time::Duration;

use thiserror::Error;

/// Bad constructor or configuration arguments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A numeric field fell outside its allowed closed range.
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// A field that must be strictly positive was zero or negative.
    #[error("{field} must be > 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    /// Two fields are individually valid but inconsistent with each other.
    #[error("{0}")]
    Inconsistent(String),
}

impl ValidationError {
    /// Check that `value` lies in `[min, max]` (NaN is always rejected).
    pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if value.is_nan() || value < min || value > max {
            return Err(ValidationError::OutOfRange { field, value, min, max });
        }
        Ok(())
    }

    /// Check that `value` is finite and strictly positive.
    pub fn check_positive(field: &'static str, value: f64) -> Result<(), Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ValidationError::NotPositive { field, value });
        }
        Ok(())
    }

    /// Check that `seconds` is a representable, non-negative [`Duration`] and
    /// return it.
    pub fn check_duration(field: &'static str, seconds: f64) -> Result<Duration, Self> {
        Duration::try_from_secs_f64(seconds).map_err(|_| ValidationError::OutOfRange {
            field,
            value: seconds,
            min: 0.0,
            max: MAX_DURATION_SECS,
        })
    }
}

/// Largest whole-second count a [`Duration`] can hold.
pub const MAX_DURATION_SECS: f64 = u64::MAX as f64;

/// Convert seconds to a [`Duration`] without panicking: negative and NaN
/// become zero, anything too large saturates at [`Duration::MAX`].
pub(crate) fn saturating_duration(seconds: f64) -> Duration {
    match Duration::try_from_secs_f64(seconds) {
        Ok(d) => d,
        Err(_) if seconds > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

/// Returned when a circuit breaker refuses a call.
///
/// Never retried: the executor surfaces it (or the fallback) immediately.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("circuit open for '{operation}', next probe in {retry_after:?}")]
pub struct CircuitOpenError {
    pub operation: String,
    /// Remaining cooldown before a half-open probe is allowed.
    pub retry_after: Duration,
}

/// Failures of [`crate::adaptive::learning::LearningController`] commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("strategy creation requires active learning mode")]
    PassiveMode,
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("strategy '{0}' has been retired")]
    Retired(String),
}

/// The outcome of a failed [`crate::adaptive::executor::AdaptiveExecutor`] call.
///
/// `Operation` always carries the *last* error the wrapped operation produced;
/// bookkeeping failures never replace it.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error("operation failed after {attempts} attempt(s): {source}")]
    Operation {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("operation timed out after {attempts} attempt(s) of {timeout:?}")]
    TimedOut { attempts: u32, timeout: Duration },
}

impl<E> ExecutionError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutionError::CircuitOpen(_))
    }

    /// The wrapped operation error, if this failure came from the operation.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecutionError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Number of attempts made before giving up (0 for fast-fail).
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::CircuitOpen(_) => 0,
            ExecutionError::Operation { attempts, .. } | ExecutionError::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// A [`crate::metrics::sink::MetricsSink`] could not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metrics sink '{sink}' rejected event: {reason}")]
pub struct SinkError {
    pub sink: String,
    pub reason: String,
}

/// Errors loading a [`crate::config::CoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
