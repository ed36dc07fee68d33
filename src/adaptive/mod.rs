//! # Module: adaptive
//!
//! Strategy learning and guarded execution.
//!
//! ## Sub-modules
//! - [`circuit_breaker`]: failure-rate state machine with a single half-open probe
//! - [`strategy`]: strategy records, the store, and the validation rule
//! - [`learning`]: thread-safe controller over the store (modes, selection, audit log)
//! - [`retry`]: bounded exponential backoff
//! - [`executor`]: runs an operation through all of the above

pub mod circuit_breaker;
pub mod strategy;
pub mod learning;
pub mod retry;
pub mod executor;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::{AdaptiveExecutor, ExecutionReport, Invocation, ResultSource};
pub use learning::{Decision, DecisionKind, LearningConfig, LearningController, LearningMode, Selection};
pub use retry::RetryConfig;
pub use strategy::{Baseline, RejectionReason, Strategy, StrategyMetrics, StrategyStore, ValidationOutcome};
