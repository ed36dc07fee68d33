//! # Tracker: SLO Compliance
//!
//! ## Responsibility
//! Counts requests, successes and latency violations for one operation and
//! derives latency compliance, availability, combined SLO compliance and the
//! remaining error budget against an [`SloConfig`].
//!
//! ## Guarantees
//! - Only counters are stored; every compliance figure is derived on read
//! - `error_budget_remaining` is always in `[0, 1]`
//! - Empty trackers report full compliance and a full budget

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// SloConfig
// ---------------------------------------------------------------------------

/// Service-level objective for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    /// Required compliance fraction in `(0, 1]`, e.g. `0.99`.
    pub target: f64,
    /// Requests slower than this count as latency violations.
    pub latency_threshold_seconds: f64,
    /// Required availability fraction in `(0, 1]`.
    pub availability_target: f64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            target: 0.99,
            latency_threshold_seconds: 1.0,
            availability_target: 0.999,
        }
    }
}

impl SloConfig {
    pub fn new(target: f64, latency_threshold_seconds: f64) -> Result<Self, ValidationError> {
        let cfg = Self { target, latency_threshold_seconds, ..Self::default() };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_positive("slo.target", self.target)?;
        ValidationError::check_range("slo.target", self.target, 0.0, 1.0)?;
        ValidationError::check_positive("slo.latency_threshold_seconds", self.latency_threshold_seconds)?;
        ValidationError::check_positive("slo.availability_target", self.availability_target)?;
        ValidationError::check_range("slo.availability_target", self.availability_target, 0.0, 1.0)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SloStatus
// ---------------------------------------------------------------------------

/// Derived compliance figures, computed by [`SloTracker::get_slo_status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SloStatus {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub latency_violations: u64,
    pub latency_compliance: f64,
    pub availability: f64,
    pub slo_compliance: f64,
    pub error_budget_remaining: f64,
    pub target: f64,
    pub meets_target: bool,
    pub meets_availability_target: bool,
}

/// Fraction of the allowed error margin `1 - target` still unspent.
pub fn error_budget_remaining(slo_compliance: f64, target: f64) -> f64 {
    let allowed = 1.0 - target;
    if allowed <= 0.0 {
        // A 100% target has no budget to spend: full until the first miss.
        return if slo_compliance >= 1.0 { 1.0 } else { 0.0 };
    }
    (1.0 - (1.0 - slo_compliance) / allowed).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// SloTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SloTracker {
    config: SloConfig,
    total_requests: u64,
    successful_requests: u64,
    latency_violations: u64,
}

impl SloTracker {
    pub fn new(config: SloConfig) -> Self {
        Self { config, total_requests: 0, successful_requests: 0, latency_violations: 0 }
    }

    pub fn config(&self) -> &SloConfig { &self.config }

    /// Swap the objective; counters are kept.
    pub fn set_config(&mut self, config: SloConfig) {
        self.config = config;
    }

    pub fn record_request(&mut self, duration_seconds: f64, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        }
        if duration_seconds > self.config.latency_threshold_seconds {
            self.latency_violations += 1;
        }
    }

    pub fn get_slo_status(&self) -> SloStatus {
        let (latency_compliance, availability) = if self.total_requests == 0 {
            (1.0, 1.0)
        } else {
            let total = self.total_requests as f64;
            (
                1.0 - self.latency_violations as f64 / total,
                self.successful_requests as f64 / total,
            )
        };
        let slo_compliance = latency_compliance.min(availability);
        SloStatus {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            latency_violations: self.latency_violations,
            latency_compliance,
            availability,
            slo_compliance,
            error_budget_remaining: error_budget_remaining(slo_compliance, self.config.target),
            target: self.config.target,
            meets_target: slo_compliance >= self.config.target,
            meets_availability_target: availability >= self.config.availability_target,
        }
    }

    pub fn reset(&mut self) {
        self.total_requests = 0;
        self.successful_requests = 0;
        self.latency_violations = 0;
    }
}

impl Default for SloTracker {
    fn default() -> Self { Self::new(SloConfig::default()) }
}
