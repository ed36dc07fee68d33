//! # Module: sampling
//!
//! Trace sampling decisions. Head samplers decide at trace start from the
//! trace id (and optionally the observed telemetry overhead); the tail sampler
//! decides at trace end from the outcome; the composite combines both.
//!
//! ## Sub-modules
//! - [`probabilistic`]: deterministic hash-bucket sampling at a fixed rate
//! - [`tail`]: error / slow-trace rules applied after completion
//! - [`adaptive`]: probabilistic sampling whose rate tracks an overhead target
//! - [`composite`]: head + tail with the upgrade-only composition law

pub mod probabilistic;
pub mod tail;
pub mod adaptive;
pub mod composite;

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{saturating_duration, ValidationError};

pub use adaptive::{AdaptiveSampler, AdaptiveSamplerStats};
pub use composite::{CompositeSampler, CompositeStats};
pub use probabilistic::ProbabilisticSampler;
pub use tail::TailBasedSampler;

/// Number of hash buckets a trace id maps into.
pub const BUCKETS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Decision types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Sample,
    Drop,
}

impl Decision {
    pub fn is_sampled(self) -> bool {
        self == Decision::Sample
    }

    fn from_bool(sampled: bool) -> Self {
        if sampled { Decision::Sample } else { Decision::Drop }
    }
}

/// What every sampler returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingDecision {
    pub decision: Decision,
    /// Rate in effect when the decision was made.
    pub sample_rate: f64,
    pub reason: &'static str,
}

impl SamplingDecision {
    pub fn is_sampled(&self) -> bool {
        self.decision.is_sampled()
    }
}

/// A sampler that decides at trace start.
pub trait HeadSampler: Send + Sync {
    /// Decide for `trace_id`. `current_overhead` is a fraction of resource
    /// spend attributable to telemetry; samplers that do not adapt ignore it.
    fn decide(&self, trace_id: Option<&str>, current_overhead: Option<f64>) -> SamplingDecision;

    fn current_rate(&self) -> f64;
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Stable bucket in `0..BUCKETS` for a trace id: the first 8 bytes of its
/// SHA-1 digest, big-endian, modulo [`BUCKETS`].
pub fn bucket(trace_id: &str) -> u64 {
    let digest = Sha1::digest(trace_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % BUCKETS
}

/// Probabilistic rule shared by the head samplers. Missing ids draw uniformly.
pub(crate) fn sampled_at(rate: f64, trace_id: Option<&str>) -> bool {
    match trace_id {
        Some(id) => (bucket(id) as f64) < rate * BUCKETS as f64,
        None => rand::thread_rng().gen::<f64>() < rate,
    }
}

// ---------------------------------------------------------------------------
// SamplingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub default_rate: f64,
    pub always_sample_errors: bool,
    pub always_sample_slow: bool,
    pub slow_threshold_ms: f64,
    /// Use an [`AdaptiveSampler`] as the head sampler.
    pub adaptive_enabled: bool,
    pub adaptive_min_rate: f64,
    pub adaptive_max_rate: f64,
    pub adaptive_target_overhead: f64,
    pub adjustment_interval_seconds: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_rate: 0.1,
            always_sample_errors: true,
            always_sample_slow: true,
            slow_threshold_ms: 1_000.0,
            adaptive_enabled: false,
            adaptive_min_rate: 0.01,
            adaptive_max_rate: 1.0,
            adaptive_target_overhead: 0.05,
            adjustment_interval_seconds: 60.0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("sampling.default_rate", self.default_rate, 0.0, 1.0)?;
        ValidationError::check_range("sampling.slow_threshold_ms", self.slow_threshold_ms, 0.0, f64::MAX)?;
        ValidationError::check_range("sampling.adaptive_min_rate", self.adaptive_min_rate, 0.0, 1.0)?;
        ValidationError::check_range("sampling.adaptive_max_rate", self.adaptive_max_rate, 0.0, 1.0)?;
        ValidationError::check_positive("sampling.adaptive_target_overhead", self.adaptive_target_overhead)?;
        ValidationError::check_duration("sampling.adjustment_interval_seconds", self.adjustment_interval_seconds)?;
        if self.adaptive_enabled {
            adaptive::check_bounds(self.default_rate, self.adaptive_min_rate, self.adaptive_max_rate)?;
        }
        Ok(())
    }

    pub fn adjustment_interval(&self) -> Duration {
        saturating_duration(self.adjustment_interval_seconds)
    }
}
