//! Adaptive execution and telemetry core.
//!
//! - [`metrics`]: per-operation latency percentiles, SLO / error budget,
//!   throughput and cost, behind a thread-safe collector
//! - [`adaptive`]: circuit breaker, strategy learning and the executor that
//!   runs an opaque async operation through both
//! - [`sampling`]: head, tail, adaptive and composite trace samplers
//! - [`config`]: typed configuration loaded from TOML

pub mod error;
pub mod metrics;
pub mod adaptive;
pub mod sampling;
pub mod config;
pub mod cli;
pub mod simulate;

pub use adaptive::{AdaptiveExecutor, CircuitBreaker, ExecutionReport, Invocation, LearningController, LearningMode};
pub use config::CoreConfig;
pub use error::{CircuitOpenError, ConfigError, ExecutionError, StrategyError, ValidationError};
pub use metrics::MetricsCollector;
pub use sampling::{CompositeSampler, Decision, SamplingDecision};
