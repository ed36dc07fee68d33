//! # Stage: Strategy Store
//!
//! ## Responsibility
//! Owns every learned [`Strategy`] and the single adopted strategy per
//! `(operation, context)` pair. Scores strategies against a [`Baseline`] with
//! the pure [`judge`] function.
//!
//! ## Guarantees
//! - O(1) metric updates via the incremental mean
//! - Retire, never delete: rejected strategies stay queryable
//! - At most one adopted strategy per `(operation, context)`; adoption swaps
//!
//! ## NOT Responsible For
//! - Thread-safety (the [`crate::adaptive::learning::LearningController`] wraps the store)
//! - Persistence across restarts

use std::{collections::HashMap, fmt, time::SystemTime};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StrategyError;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Running success rate and mean latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub success_rate: f64,
    /// Seconds.
    pub avg_latency: f64,
    pub total_executions: u64,
}

impl StrategyMetrics {
    /// Fold one observation in with `new = old + (value - old) / count`.
    pub fn record(&mut self, success: bool, latency_seconds: f64) {
        self.total_executions += 1;
        let n = self.total_executions as f64;
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate += (hit - self.success_rate) / n;
        if latency_seconds.is_finite() && latency_seconds >= 0.0 {
            self.avg_latency += (latency_seconds - self.avg_latency) / n;
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Strategy {
    pub id: String,
    pub operation_name: String,
    pub context_label: String,
    /// Free-form configuration the operation runs under while this strategy is selected.
    pub params: Value,
    pub metrics: StrategyMetrics,
    pub created_at: SystemTime,
    pub validated: bool,
    pub adopted: bool,
    pub retired: bool,
}

impl Strategy {
    /// Still eligible for trial traffic.
    pub fn is_candidate(&self) -> bool {
        !self.retired && !self.adopted
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// What a strategy is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Baseline {
    pub success_rate: f64,
    pub avg_latency: f64,
    /// Observations behind the baseline. Zero means nothing to compare against.
    pub samples: u64,
}

impl From<StrategyMetrics> for Baseline {
    fn from(m: StrategyMetrics) -> Self {
        Self { success_rate: m.success_rate, avg_latency: m.avg_latency, samples: m.total_executions }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    PerformanceRegression,
    InsufficientImprovement,
    InsufficientData,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::PerformanceRegression   => "performance_regression",
            RejectionReason::InsufficientImprovement => "insufficient_improvement",
            RejectionReason::InsufficientData        => "insufficient_data",
        }
    }

    /// Whether this rejection retires the strategy. Missing data only defers.
    pub fn retires(&self) -> bool {
        !matches!(self, RejectionReason::InsufficientData)
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: RejectionReason },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            ValidationOutcome::Accepted => None,
            ValidationOutcome::Rejected { reason } => Some(*reason),
        }
    }
}

/// Thresholds applied by [`judge`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRule {
    /// Observations required before any verdict.
    pub window: u64,
    /// Accepted latency is at most `baseline * latency_tolerance`.
    pub latency_tolerance: f64,
    /// Required gain in success rate or relative latency; 0 disables the check.
    pub min_improvement: f64,
}

/// Score `metrics` against `baseline`.
pub fn judge(metrics: &StrategyMetrics, baseline: &Baseline, rule: &ValidationRule) -> ValidationOutcome {
    use ValidationOutcome::{Accepted, Rejected};

    if metrics.total_executions < rule.window {
        return Rejected { reason: RejectionReason::InsufficientData };
    }
    if baseline.samples == 0 {
        return Accepted;
    }
    if metrics.success_rate < baseline.success_rate
        || metrics.avg_latency > baseline.avg_latency * rule.latency_tolerance
    {
        return Rejected { reason: RejectionReason::PerformanceRegression };
    }
    if rule.min_improvement > 0.0 {
        let success_gain = metrics.success_rate - baseline.success_rate;
        let latency_gain = if baseline.avg_latency > 0.0 {
            (baseline.avg_latency - metrics.avg_latency) / baseline.avg_latency
        } else {
            0.0
        };
        if success_gain < rule.min_improvement && latency_gain < rule.min_improvement {
            return Rejected { reason: RejectionReason::InsufficientImprovement };
        }
    }
    Accepted
}

// ---------------------------------------------------------------------------
// StrategyStore
// ---------------------------------------------------------------------------

type ContextKey = (String, String);

fn key(operation: &str, context: &str) -> ContextKey {
    (operation.to_string(), context.to_string())
}

#[derive(Debug, Default)]
pub struct StrategyStore {
    strategies: HashMap<String, Strategy>,
    /// Insertion order, for stable listing.
    order: Vec<String>,
    adopted: HashMap<ContextKey, String>,
}

impl StrategyStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.strategies.len() }

    pub fn is_empty(&self) -> bool { self.strategies.is_empty() }

    /// Register a zeroed strategy and return its id.
    pub fn insert(&mut self, operation: &str, context: &str, params: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let strategy = Strategy {
            id: id.clone(),
            operation_name: operation.to_string(),
            context_label: context.to_string(),
            params,
            metrics: StrategyMetrics::default(),
            created_at: SystemTime::now(),
            validated: false,
            adopted: false,
            retired: false,
        };
        self.strategies.insert(id.clone(), strategy);
        self.order.push(id.clone());
        id
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Strategy, StrategyError> {
        self.strategies.get_mut(id).ok_or_else(|| StrategyError::UnknownStrategy(id.to_string()))
    }

    /// Fold one outcome into the strategy. Retired strategies are left untouched.
    pub fn record_outcome(&mut self, id: &str, success: bool, latency_seconds: f64) -> Result<(), StrategyError> {
        let s = self.get_mut(id)?;
        if !s.retired {
            s.metrics.record(success, latency_seconds);
        }
        Ok(())
    }

    pub fn adopted_for(&self, operation: &str, context: &str) -> Option<&Strategy> {
        self.adopted
            .get(&key(operation, context))
            .and_then(|id| self.strategies.get(id))
    }

    /// Make `id` the adopted strategy for its pair. Returns the id it replaced.
    pub fn adopt(&mut self, id: &str) -> Result<Option<String>, StrategyError> {
        let s = self.get_mut(id)?;
        if s.retired {
            return Err(StrategyError::Retired(id.to_string()));
        }
        s.adopted = true;
        let pair = key(&s.operation_name, &s.context_label);
        let previous = self.adopted.insert(pair, id.to_string()).filter(|p| p != id);
        if let Some(prev) = previous.as_deref().and_then(|p| self.strategies.get_mut(p)) {
            prev.adopted = false;
        }
        Ok(previous)
    }

    /// Mark `id` retired, dropping its adoption if it held one.
    pub fn retire(&mut self, id: &str) -> Result<(), StrategyError> {
        let s = self.get_mut(id)?;
        s.retired = true;
        let was_adopted = std::mem::replace(&mut s.adopted, false);
        if was_adopted {
            let pair = key(&s.operation_name, &s.context_label);
            self.adopted.remove(&pair);
        }
        Ok(())
    }

    /// Strategies under trial for a pair, oldest first.
    pub fn candidates(&self, operation: &str, context: &str) -> Vec<&Strategy> {
        self.iter()
            .filter(|s| s.operation_name == operation && s.context_label == context && s.is_candidate())
            .collect()
    }

    /// All strategies, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.order.iter().filter_map(|id| self.strategies.get(id))
    }
}
