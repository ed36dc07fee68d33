//! # Stage: Adaptive Sampler
//!
//! ## Responsibility
//! Head sampler whose rate follows a telemetry-overhead target. Callers report
//! the overhead they observe with each decision; at most once per adjustment
//! interval the mean of those reports moves the rate.
//!
//! ## Guarantees
//! - `min_rate <= current_rate <= max_rate` at all times
//! - Decisions between adjustments use the hash-bucket rule at the current rate
//! - A single step never more than halves the rate, and raises it by 10%
//!
//! ## NOT Responsible For
//! - Measuring overhead (caller supplies it)

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::debug;

use super::{sampled_at, Decision, HeadSampler, SamplingDecision};
use crate::error::ValidationError;

/// Overhead below `target * COMFORT_BAND` counts as comfortably under target.
const COMFORT_BAND: f64 = 0.8;
const RAISE_FACTOR: f64 = 1.1;
const MAX_CUT: f64 = 0.5;

pub(crate) fn check_bounds(base: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    ValidationError::check_range("min_rate", min, 0.0, 1.0)?;
    ValidationError::check_range("max_rate", max, 0.0, 1.0)?;
    if min > max {
        return Err(ValidationError::Inconsistent(format!("min_rate ({min}) exceeds max_rate ({max})")));
    }
    ValidationError::check_range("base_rate", base, min, max)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveSamplerStats {
    pub current_rate: f64,
    pub total_decisions: u64,
    pub sampled_decisions: u64,
    /// `sampled / total`, 0 before the first decision.
    pub realized_rate: f64,
    pub adjustments: u64,
    pub target_overhead: f64,
}

#[derive(Debug)]
struct Inner {
    current_rate: f64,
    last_adjustment: Instant,
    overhead_sum: f64,
    overhead_count: u64,
    total: u64,
    sampled: u64,
    adjustments: u64,
}

#[derive(Debug)]
pub struct AdaptiveSampler {
    min_rate: f64,
    max_rate: f64,
    target_overhead: f64,
    interval: Duration,
    inner: Mutex<Inner>,
}

impl AdaptiveSampler {
    pub fn new(
        base_rate: f64,
        min_rate: f64,
        max_rate: f64,
        target_overhead: f64,
        adjustment_interval: Duration,
    ) -> Result<Self, ValidationError> {
        check_bounds(base_rate, min_rate, max_rate)?;
        ValidationError::check_positive("target_overhead", target_overhead)?;
        Ok(Self {
            min_rate,
            max_rate,
            target_overhead,
            interval: adjustment_interval,
            inner: Mutex::new(Inner {
                current_rate: base_rate,
                last_adjustment: Instant::now(),
                overhead_sum: 0.0,
                overhead_count: 0,
                total: 0,
                sampled: 0,
                adjustments: 0,
            }),
        })
    }

    pub fn get_stats(&self) -> AdaptiveSamplerStats {
        let inner = self.lock();
        AdaptiveSamplerStats {
            current_rate: inner.current_rate,
            total_decisions: inner.total,
            sampled_decisions: inner.sampled,
            realized_rate: if inner.total == 0 { 0.0 } else { inner.sampled as f64 / inner.total as f64 },
            adjustments: inner.adjustments,
            target_overhead: self.target_overhead,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_adjust(&self, inner: &mut Inner) {
        if inner.overhead_count == 0 || inner.last_adjustment.elapsed() < self.interval {
            return;
        }
        let observed = inner.overhead_sum / inner.overhead_count as f64;
        let before = inner.current_rate;
        let proposed = if observed > self.target_overhead {
            before * (self.target_overhead / observed).max(MAX_CUT)
        } else if observed < self.target_overhead * COMFORT_BAND {
            before * RAISE_FACTOR
        } else {
            before
        };
        inner.current_rate = proposed.clamp(self.min_rate, self.max_rate);
        inner.overhead_sum = 0.0;
        inner.overhead_count = 0;
        inner.last_adjustment = Instant::now();
        if inner.current_rate != before {
            inner.adjustments += 1;
            debug!(observed, before, after = inner.current_rate, "sampling rate adjusted");
        }
    }
}

impl HeadSampler for AdaptiveSampler {
    fn decide(&self, trace_id: Option<&str>, current_overhead: Option<f64>) -> SamplingDecision {
        let mut inner = self.lock();
        if let Some(o) = current_overhead.filter(|o| o.is_finite() && *o >= 0.0) {
            inner.overhead_sum += o;
            inner.overhead_count += 1;
        }
        self.maybe_adjust(&mut inner);

        let rate = inner.current_rate;
        let sampled = sampled_at(rate, trace_id);
        inner.total += 1;
        if sampled {
            inner.sampled += 1;
        }
        SamplingDecision {
            decision: Decision::from_bool(sampled),
            sample_rate: rate,
            reason: if sampled { "adaptive_sampled" } else { "adaptive_dropped" },
        }
    }

    fn current_rate(&self) -> f64 {
        self.lock().current_rate
    }
}
