//! # Stage: Learning Controller
//!
//! ## Responsibility
//! Thread-safe front of the [`StrategyStore`]. Creates strategies in active
//! mode, routes trial traffic, accumulates the passthrough baseline, validates
//! candidates and swaps adoptions. Every validation, adoption, retirement and
//! context switch lands in a bounded decision log.
//!
//! ## Guarantees
//! - Passive mode never creates or adopts strategies; it only observes
//! - One adopted strategy per `(operation, context)`, swapped atomically
//! - Bounded: the decision log keeps at most `decision_log_cap` entries
//!
//! ## NOT Responsible For
//! - Running the operation (see [`crate::adaptive::executor`])
//! - Deciding what `params` mean to the operation

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::strategy::{judge, Baseline, Strategy, StrategyMetrics, StrategyStore, ValidationOutcome, ValidationRule};
use crate::error::{StrategyError, ValidationError};

/// Context label used until `set_context` names another.
pub const DEFAULT_CONTEXT: &str = "default";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    /// Observe only.
    #[default]
    Passive,
    /// Create, trial and promote strategies.
    Active,
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningMode::Passive => write!(f, "passive"),
            LearningMode::Active  => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub mode: LearningMode,
    /// Observations a strategy needs before it can be judged.
    pub validation_window: u64,
    /// Candidate latency may be at most `baseline * latency_tolerance`.
    pub latency_tolerance: f64,
    /// Required gain over baseline; 0 accepts anything that does not regress.
    pub min_improvement: f64,
    /// Share of executions routed to a candidate under trial.
    pub exploration_rate: f64,
    /// Judge a candidate automatically once its window fills.
    pub auto_validate: bool,
    pub decision_log_cap: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            mode: LearningMode::Passive,
            validation_window: 20,
            latency_tolerance: 1.1,
            min_improvement: 0.0,
            exploration_rate: 0.1,
            auto_validate: true,
            decision_log_cap: 1_000,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.validation_window == 0 {
            return Err(ValidationError::NotPositive { field: "learning.validation_window", value: 0.0 });
        }
        ValidationError::check_range("learning.latency_tolerance", self.latency_tolerance, 1.0, f64::MAX)?;
        ValidationError::check_range("learning.min_improvement", self.min_improvement, 0.0, 1.0)?;
        ValidationError::check_range("learning.exploration_rate", self.exploration_rate, 0.0, 1.0)?;
        if self.decision_log_cap == 0 {
            return Err(ValidationError::NotPositive { field: "learning.decision_log_cap", value: 0.0 });
        }
        Ok(())
    }

    fn rule(&self, window: u64) -> ValidationRule {
        ValidationRule { window, latency_tolerance: self.latency_tolerance, min_improvement: self.min_improvement }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The strategy chosen for one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedStrategy {
    pub id: String,
    pub params: Value,
    /// Routed as exploration traffic rather than as the adopted strategy.
    pub trial: bool,
}

/// Result of [`LearningController::select`]. `strategy == None` is passthrough.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub operation: String,
    pub context: String,
    pub strategy: Option<SelectedStrategy>,
}

impl Selection {
    pub fn strategy_id(&self) -> Option<&str> {
        self.strategy.as_ref().map(|s| s.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    Validated { outcome: ValidationOutcome },
    Adopted { replaced: Option<String> },
    Retired,
    ContextSwitched { from: String, adopted: Option<String> },
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub id: String,
    pub at: SystemTime,
    pub operation: String,
    pub context: String,
    pub strategy_id: Option<String>,
    #[serde(flatten)]
    pub kind: DecisionKind,
}

// ---------------------------------------------------------------------------
// LearningController
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    store: StrategyStore,
    /// Passthrough outcomes per (operation, context).
    baselines: HashMap<(String, String), StrategyMetrics>,
    contexts: HashMap<String, String>,
    decisions: VecDeque<Decision>,
}

#[derive(Debug)]
pub struct LearningController {
    config: LearningConfig,
    mode: Mutex<LearningMode>,
    state: Mutex<State>,
}

impl LearningController {
    pub fn new(config: LearningConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { mode: Mutex::new(config.mode), config, state: Mutex::new(State::default()) })
    }

    pub fn config(&self) -> &LearningConfig { &self.config }

    pub fn mode(&self) -> LearningMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: LearningMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        info!(%mode, "learning mode changed");
    }

    pub fn create_strategy(&self, operation: &str, context: &str) -> Result<String, StrategyError> {
        self.create_strategy_with_params(operation, context, Value::Null)
    }

    pub fn create_strategy_with_params(
        &self,
        operation: &str,
        context: &str,
        params: Value,
    ) -> Result<String, StrategyError> {
        self.require_active()?;
        let id = self.lock().store.insert(operation, context, params);
        debug!(operation, context, strategy = %id, "strategy created");
        Ok(id)
    }

    pub fn record_outcome(&self, id: &str, success: bool, latency_seconds: f64) -> Result<(), StrategyError> {
        self.lock().store.record_outcome(id, success, latency_seconds)
    }

    /// Record a passthrough execution into the baseline for `(operation, context)`.
    pub fn record_baseline(&self, operation: &str, context: &str, success: bool, latency_seconds: f64) {
        self.lock()
            .baselines
            .entry((operation.to_string(), context.to_string()))
            .or_default()
            .record(success, latency_seconds);
    }

    /// Record the final outcome of an execution made under `selection`.
    ///
    /// Trial candidates whose window has filled are judged on the spot when
    /// `auto_validate` is set and the controller is active.
    pub fn record_execution(&self, selection: &Selection, success: bool, latency_seconds: f64) {
        let Some(chosen) = &selection.strategy else {
            self.record_baseline(&selection.operation, &selection.context, success, latency_seconds);
            return;
        };
        let auto = chosen.trial && self.config.auto_validate && self.mode() == LearningMode::Active;
        let mut state = self.lock();
        if state.store.record_outcome(&chosen.id, success, latency_seconds).is_err() {
            return;
        }
        let ready = state
            .store
            .get(&chosen.id)
            .is_some_and(|s| s.is_candidate() && s.metrics.total_executions >= self.config.validation_window);
        if auto && ready {
            if let Err(e) = self.evaluate_locked(&mut state, &chosen.id) {
                debug!(strategy = %chosen.id, error = %e, "automatic evaluation skipped");
            }
        }
    }

    /// What a candidate for the pair is compared against: the adopted
    /// strategy's metrics, else the passthrough metrics.
    pub fn baseline(&self, operation: &str, context: &str) -> Baseline {
        Self::baseline_locked(&self.lock(), operation, context)
    }

    /// Judge `id` against `baseline` after `window` observations.
    ///
    /// Regression and insufficient improvement retire the strategy; missing
    /// data leaves it under trial.
    pub fn validate(&self, id: &str, window: u64, baseline: &Baseline) -> Result<ValidationOutcome, StrategyError> {
        let mut state = self.lock();
        self.validate_locked(&mut state, id, window, baseline)
    }

    /// Validate against the current baseline with the configured window, then
    /// adopt on acceptance.
    pub fn evaluate(&self, id: &str) -> Result<ValidationOutcome, StrategyError> {
        self.require_active()?;
        let mut state = self.lock();
        self.evaluate_locked(&mut state, id)
    }

    /// Make `id` the adopted strategy for its `(operation, context)`.
    pub fn adopt(&self, id: &str) -> Result<Option<String>, StrategyError> {
        self.require_active()?;
        let mut state = self.lock();
        self.adopt_locked(&mut state, id)
    }

    pub fn retire(&self, id: &str) -> Result<(), StrategyError> {
        let mut state = self.lock();
        state.store.retire(id)?;
        self.log_strategy(&mut state, id, DecisionKind::Retired);
        Ok(())
    }

    /// Switch the active context for `operation`. Returns the adopted strategy
    /// that now applies, or `None` when execution falls back to passthrough.
    pub fn set_context(&self, operation: &str, context: &str) -> Option<String> {
        let mut state = self.lock();
        let from = state
            .contexts
            .insert(operation.to_string(), context.to_string())
            .unwrap_or_else(|| DEFAULT_CONTEXT.to_string());
        if from == context {
            return state.store.adopted_for(operation, context).map(|s| s.id.clone());
        }
        let adopted = state.store.adopted_for(operation, context).map(|s| s.id.clone());
        match &adopted {
            Some(id) => info!(operation, %from, to = context, strategy = %id, "context switched"),
            None => info!(operation, %from, to = context, "context switched; no adopted strategy, using baseline"),
        }
        self.push_decision(
            &mut state,
            Decision {
                id: Uuid::new_v4().to_string(),
                at: SystemTime::now(),
                operation: operation.to_string(),
                context: context.to_string(),
                strategy_id: adopted.clone(),
                kind: DecisionKind::ContextSwitched { from, adopted: adopted.clone() },
            },
        );
        adopted
    }

    pub fn context(&self, operation: &str) -> String {
        Self::context_locked(&self.lock(), operation)
    }

    /// Choose how the next execution of `operation` runs.
    pub fn select(&self, operation: &str) -> Selection {
        let explore = self.mode() == LearningMode::Active && self.config.exploration_rate > 0.0;
        let state = self.lock();
        let context = Self::context_locked(&state, operation);

        let mut strategy = None;
        if explore {
            let candidate = state
                .store
                .candidates(operation, &context)
                .into_iter()
                .min_by_key(|s| s.metrics.total_executions);
            if let Some(c) = candidate {
                if rand::thread_rng().gen::<f64>() < self.config.exploration_rate {
                    strategy = Some(SelectedStrategy { id: c.id.clone(), params: c.params.clone(), trial: true });
                }
            }
        }
        if strategy.is_none() {
            strategy = state
                .store
                .adopted_for(operation, &context)
                .map(|s| SelectedStrategy { id: s.id.clone(), params: s.params.clone(), trial: false });
        }
        Selection { operation: operation.to_string(), context, strategy }
    }

    pub fn strategy(&self, id: &str) -> Option<Strategy> {
        self.lock().store.get(id).cloned()
    }

    /// All strategies, oldest first.
    pub fn strategies(&self) -> Vec<Strategy> {
        self.lock().store.iter().cloned().collect()
    }

    pub fn adopted(&self, operation: &str, context: &str) -> Option<Strategy> {
        self.lock().store.adopted_for(operation, context).cloned()
    }

    /// The decision log, newest last.
    pub fn decisions(&self) -> Vec<Decision> {
        self.lock().decisions.iter().cloned().collect()
    }

    // -- internals ----------------------------------------------------------

    fn require_active(&self) -> Result<(), StrategyError> {
        match self.mode() {
            LearningMode::Active => Ok(()),
            LearningMode::Passive => Err(StrategyError::PassiveMode),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context_locked(state: &State, operation: &str) -> String {
        state.contexts.get(operation).cloned().unwrap_or_else(|| DEFAULT_CONTEXT.to_string())
    }

    fn baseline_locked(state: &State, operation: &str, context: &str) -> Baseline {
        if let Some(adopted) = state.store.adopted_for(operation, context) {
            if adopted.metrics.total_executions > 0 {
                return adopted.metrics.into();
            }
        }
        state
            .baselines
            .get(&(operation.to_string(), context.to_string()))
            .copied()
            .map(Baseline::from)
            .unwrap_or_default()
    }

    fn validate_locked(
        &self,
        state: &mut State,
        id: &str,
        window: u64,
        baseline: &Baseline,
    ) -> Result<ValidationOutcome, StrategyError> {
        let strategy = state.store.get(id).ok_or_else(|| StrategyError::UnknownStrategy(id.to_string()))?;
        if strategy.retired {
            return Err(StrategyError::Retired(id.to_string()));
        }
        let outcome = judge(&strategy.metrics, baseline, &self.config.rule(window));
        match outcome.reason() {
            None => state.store.get_mut(id)?.validated = true,
            Some(reason) if reason.retires() => {
                state.store.retire(id)?;
                info!(strategy = %id, %reason, "strategy rejected and retired");
            }
            Some(reason) => debug!(strategy = %id, %reason, "strategy not yet judgeable"),
        }
        self.log_strategy(state, id, DecisionKind::Validated { outcome });
        Ok(outcome)
    }

    fn evaluate_locked(&self, state: &mut State, id: &str) -> Result<ValidationOutcome, StrategyError> {
        let (operation, context) = match state.store.get(id) {
            Some(s) => (s.operation_name.clone(), s.context_label.clone()),
            None => return Err(StrategyError::UnknownStrategy(id.to_string())),
        };
        let baseline = Self::baseline_locked(state, &operation, &context);
        let outcome = self.validate_locked(state, id, self.config.validation_window, &baseline)?;
        if outcome.is_accepted() {
            self.adopt_locked(state, id)?;
        }
        Ok(outcome)
    }

    fn adopt_locked(&self, state: &mut State, id: &str) -> Result<Option<String>, StrategyError> {
        let replaced = state.store.adopt(id)?;
        info!(strategy = %id, replaced = ?replaced, "strategy adopted");
        self.log_strategy(state, id, DecisionKind::Adopted { replaced: replaced.clone() });
        Ok(replaced)
    }

    fn log_strategy(&self, state: &mut State, id: &str, kind: DecisionKind) {
        let (operation, context) = state
            .store
            .get(id)
            .map(|s| (s.operation_name.clone(), s.context_label.clone()))
            .unwrap_or_default();
        self.push_decision(
            state,
            Decision {
                id: Uuid::new_v4().to_string(),
                at: SystemTime::now(),
                operation,
                context,
                strategy_id: Some(id.to_string()),
                kind,
            },
        );
    }

    fn push_decision(&self, state: &mut State, decision: Decision) {
        if state.decisions.len() >= self.config.decision_log_cap {
            state.decisions.pop_front();
        }
        state.decisions.push_back(decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::strategy::RejectionReason;
    use serde_json::json;

    fn active(window: u64) -> LearningController {
        LearningController::new(LearningConfig {
            mode: LearningMode::Active,
            validation_window: window,
            exploration_rate: 1.0,
            ..Default::default()
        })
        .unwrap()
    }

    fn feed(c: &LearningController, id: &str, n: usize, success: bool, latency: f64) {
        for _ in 0..n {
            c.record_outcome(id, success, latency).unwrap();
        }
    }

    #[test]
    fn test_passive_mode_refuses_creation() {
        let c = LearningController::new(LearningConfig::default()).unwrap();
        assert_eq!(c.create_strategy("op", "ctx"), Err(StrategyError::PassiveMode));
    }

    #[test]
    fn test_create_starts_zeroed() {
        let c = active(5);
        let id = c.create_strategy_with_params("op", "ctx", json!({"model": "small"})).unwrap();
        let s = c.strategy(&id).unwrap();
        assert_eq!(s.metrics.total_executions, 0);
        assert_eq!(s.params["model"], "small");
        assert!(!s.validated && !s.adopted && !s.retired);
    }

    #[test]
    fn test_validate_insufficient_data_keeps_strategy() {
        let c = active(10);
        let id = c.create_strategy("op", "ctx").unwrap();
        feed(&c, &id, 9, true, 0.01);
        let out = c.validate(&id, 10, &Baseline { success_rate: 0.0, avg_latency: 9.0, samples: 50 }).unwrap();
        assert_eq!(out.reason(), Some(RejectionReason::InsufficientData));
        assert!(!c.strategy(&id).unwrap().retired);
    }

    #[test]
    fn test_validate_regression_retires() {
        let c = active(3);
        let id = c.create_strategy("op", "ctx").unwrap();
        feed(&c, &id, 3, false, 0.1);
        let out = c.validate(&id, 3, &Baseline { success_rate: 0.9, avg_latency: 0.1, samples: 50 }).unwrap();
        assert_eq!(out.reason(), Some(RejectionReason::PerformanceRegression));
        assert!(c.strategy(&id).unwrap().retired);
        assert_eq!(c.validate(&id, 3, &Baseline::default()), Err(StrategyError::Retired(id.clone())));
    }

    #[test]
    fn test_evaluate_adopts_on_acceptance() {
        let c = active(3);
        for _ in 0..10 {
            c.record_baseline("op", "ctx", true, 0.2);
        }
        let id = c.create_strategy("op", "ctx").unwrap();
        feed(&c, &id, 3, true, 0.1);
        assert!(c.evaluate(&id).unwrap().is_accepted());
        assert_eq!(c.adopted("op", "ctx").map(|s| s.id), Some(id.clone()));
        assert!(c.strategy(&id).unwrap().validated);
    }

    #[test]
    fn test_baseline_prefers_adopted_metrics() {
        let c = active(1);
        c.record_baseline("op", "ctx", true, 1.0);
        let id = c.create_strategy("op", "ctx").unwrap();
        feed(&c, &id, 2, true, 0.5);
        c.adopt(&id).unwrap();
        let b = c.baseline("op", "ctx");
        assert_eq!(b.samples, 2);
        assert!((b.avg_latency - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_select_passthrough_when_nothing_adopted() {
        let c = LearningController::new(LearningConfig::default()).unwrap();
        let sel = c.select("op");
        assert_eq!(sel.context, DEFAULT_CONTEXT);
        assert!(sel.strategy.is_none());
    }

    #[test]
    fn test_select_trials_candidate_when_exploring() {
        let c = active(5);
        let id = c.create_strategy("op", DEFAULT_CONTEXT).unwrap();
        let sel = c.select("op");
        assert_eq!(sel.strategy_id(), Some(id.as_str()));
        assert!(sel.strategy.unwrap().trial);
    }

    #[test]
    fn test_select_adopted_when_passive() {
        let c = active(5);
        let id = c.create_strategy("op", DEFAULT_CONTEXT).unwrap();
        c.adopt(&id).unwrap();
        c.set_mode(LearningMode::Passive);
        let sel = c.select("op");
        assert_eq!(sel.strategy_id(), Some(id.as_str()));
        assert!(!sel.strategy.unwrap().trial);
    }

    #[test]
    fn test_context_drift_falls_back_to_baseline() {
        let c = active(5);
        let id = c.create_strategy("op", DEFAULT_CONTEXT).unwrap();
        c.adopt(&id).unwrap();
        c.set_mode(LearningMode::Passive);
        assert_eq!(c.set_context("op", "night"), None);
        assert!(c.select("op").strategy.is_none());
        assert_eq!(c.set_context("op", DEFAULT_CONTEXT), Some(id));
        let switches = c
            .decisions()
            .into_iter()
            .filter(|d| matches!(d.kind, DecisionKind::ContextSwitched { .. }))
            .count();
        assert_eq!(switches, 2);
    }

    #[test]
    fn test_auto_validate_on_trial_execution() {
        let c = active(2);
        let id = c.create_strategy("op", DEFAULT_CONTEXT).unwrap();
        for _ in 0..2 {
            let sel = c.select("op");
            c.record_execution(&sel, true, 0.05);
        }
        assert!(c.strategy(&id).unwrap().adopted);
    }

    #[test]
    fn test_auto_validate_rejection_retires_and_logs_outcome() {
        let c = active(2);
        for _ in 0..5 {
            c.record_baseline("op", DEFAULT_CONTEXT, true, 0.05);
        }
        let id = c.create_strategy("op", DEFAULT_CONTEXT).unwrap();
        for _ in 0..2 {
            let sel = c.select("op");
            c.record_execution(&sel, false, 0.05);
        }
        let s = c.strategy(&id).unwrap();
        assert!(s.retired && !s.adopted);
        let outcome = c.decisions().into_iter().find_map(|d| match d.kind {
            DecisionKind::Validated { outcome } => outcome.reason(),
            _ => None,
        });
        assert_eq!(outcome, Some(RejectionReason::PerformanceRegression));

        // later executions of the retired strategy change nothing
        let stale = Selection {
            operation: "op".into(),
            context: DEFAULT_CONTEXT.into(),
            strategy: Some(SelectedStrategy { id: id.clone(), params: Value::Null, trial: true }),
        };
        c.record_execution(&stale, true, 0.01);
        assert_eq!(c.strategy(&id).unwrap().metrics.total_executions, 2);
    }

    #[test]
    fn test_passthrough_execution_feeds_baseline() {
        let c = LearningController::new(LearningConfig::default()).unwrap();
        let sel = c.select("op");
        c.record_execution(&sel, false, 0.3);
        let b = c.baseline("op", DEFAULT_CONTEXT);
        assert_eq!(b.samples, 1);
        assert_eq!(b.success_rate, 0.0);
    }

    #[test]
    fn test_decision_log_bounded() {
        let c = LearningController::new(LearningConfig {
            mode: LearningMode::Active,
            decision_log_cap: 3,
            ..Default::default()
        })
        .unwrap();
        for i in 0..5 {
            c.set_context("op", &format!("ctx{i}"));
        }
        let log = c.decisions();
        assert_eq!(log.len(), 3);
        assert_eq!(log.last().map(|d| d.context.as_str()), Some("ctx4"));
    }

    #[test]
    fn test_config_validation() {
        assert!(LearningConfig { latency_tolerance: 0.9, ..Default::default() }.validate().is_err());
        assert!(LearningConfig { exploration_rate: 1.5, ..Default::default() }.validate().is_err());
        assert!(LearningConfig { validation_window: 0, ..Default::default() }.validate().is_err());
    }
}
