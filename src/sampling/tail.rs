//! Post-execution sampling rules: keep errored traces and slow traces.

use super::{Decision, SamplingDecision};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailBasedSampler {
    always_sample_errors: bool,
    always_sample_slow: bool,
    slow_threshold_ms: f64,
}

impl TailBasedSampler {
    pub fn new(always_sample_errors: bool, always_sample_slow: bool, slow_threshold_ms: f64) -> Result<Self, ValidationError> {
        ValidationError::check_range("slow_threshold_ms", slow_threshold_ms, 0.0, f64::MAX)?;
        Ok(Self { always_sample_errors, always_sample_slow, slow_threshold_ms })
    }

    pub fn slow_threshold_ms(&self) -> f64 { self.slow_threshold_ms }

    /// SAMPLE on an error or on `duration_ms >= slow_threshold_ms`, each only
    /// when its rule is enabled.
    pub fn decide(&self, _trace_id: Option<&str>, has_error: bool, duration_ms: f64) -> SamplingDecision {
        let (decision, reason) = if has_error && self.always_sample_errors {
            (Decision::Sample, "tail_error")
        } else if self.always_sample_slow && duration_ms >= self.slow_threshold_ms {
            (Decision::Sample, "tail_slow")
        } else {
            (Decision::Drop, "tail_normal")
        };
        SamplingDecision {
            decision,
            sample_rate: if decision.is_sampled() { 1.0 } else { 0.0 },
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_boundary_inclusive() {
        let s = TailBasedSampler::new(true, true, 1_000.0).unwrap();
        assert_eq!(s.decide(None, false, 999.0).decision, Decision::Drop);
        let d = s.decide(None, false, 1_000.0);
        assert_eq!((d.decision, d.reason), (Decision::Sample, "tail_slow"));
    }

    #[test]
    fn test_error_rule() {
        let s = TailBasedSampler::new(true, true, 1_000.0).unwrap();
        assert_eq!(s.decide(Some("t"), true, 1.0).reason, "tail_error");
    }

    #[test]
    fn test_disabled_rules_never_trigger() {
        let s = TailBasedSampler::new(false, false, 10.0).unwrap();
        let d = s.decide(None, true, 1e9);
        assert_eq!((d.decision, d.reason), (Decision::Drop, "tail_normal"));
    }

    #[test]
    fn test_rejects_negative_threshold() {
        assert!(TailBasedSampler::new(true, true, -1.0).is_err());
    }
}
