//! # Tracker: Cost and Savings
//!
//! ## Responsibility
//! Running cost and savings totals for one operation, broken down by
//! category (e.g. `"llm"`, `"cache"`), plus the derived savings rate.
//!
//! ## Guarantees
//! - Every stored value is finite and ≥ 0; other amounts are dropped with a warning
//! - Non-panicking: the savings rate guards its zero denominator

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

/// Category used when an execution reports cost without naming one.
pub const DEFAULT_CATEGORY: &str = "execution";

/// Snapshot returned by [`CostTracker::get_stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostStats {
    pub total_cost: f64,
    pub total_savings: f64,
    pub net_cost: f64,
    /// `savings / (cost + savings)`, or 0 when both are zero.
    pub savings_rate: f64,
    pub cost_breakdown: BTreeMap<String, f64>,
    pub savings_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    total_cost: f64,
    total_savings: f64,
    cost_breakdown: BTreeMap<String, f64>,
    savings_breakdown: BTreeMap<String, f64>,
}

impl CostTracker {
    pub fn new() -> Self { Self::default() }

    pub fn record_cost(&mut self, amount: f64, category: &str) {
        if accept("cost", amount, category) {
            self.total_cost += amount;
            *self.cost_breakdown.entry(category.to_string()).or_insert(0.0) += amount;
        }
    }

    pub fn record_savings(&mut self, amount: f64, category: &str) {
        if accept("savings", amount, category) {
            self.total_savings += amount;
            *self.savings_breakdown.entry(category.to_string()).or_insert(0.0) += amount;
        }
    }

    pub fn total_cost(&self) -> f64 { self.total_cost }

    pub fn total_savings(&self) -> f64 { self.total_savings }

    pub fn savings_rate(&self) -> f64 {
        let denom = self.total_cost + self.total_savings;
        if denom > 0.0 { self.total_savings / denom } else { 0.0 }
    }

    pub fn get_stats(&self) -> CostStats {
        CostStats {
            total_cost: self.total_cost,
            total_savings: self.total_savings,
            net_cost: self.total_cost - self.total_savings,
            savings_rate: self.savings_rate(),
            cost_breakdown: self.cost_breakdown.clone(),
            savings_breakdown: self.savings_breakdown.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn accept(kind: &str, amount: f64, category: &str) -> bool {
    if amount.is_finite() && amount >= 0.0 {
        return true;
    }
    warn!(kind, amount, category, "ignoring invalid amount");
    false
}
