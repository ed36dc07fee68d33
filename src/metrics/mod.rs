//! # Module: metrics
//!
//! Per-operation telemetry: latency percentiles, SLO compliance and error
//! budget, windowed throughput, and cost/savings accounting, behind one
//! thread-safe [`collector::MetricsCollector`].
//!
//! ## Sub-modules
//! - [`percentile`]: bounded FIFO reservoir, nearest-rank p50/p90/p95/p99
//! - [`slo`]: compliance, availability and error budget
//! - [`throughput`]: rolling-window request rate and active gauge
//! - [`cost`]: categorized cost and savings totals
//! - [`sink`]: exporter capability trait and built-in sinks
//! - [`collector`]: the facade and the process-wide accessor

pub mod percentile;
pub mod slo;
pub mod throughput;
pub mod cost;
pub mod sink;
pub mod collector;

pub use collector::{global, MetricsCollector, MetricsConfig, OperationSnapshot};
