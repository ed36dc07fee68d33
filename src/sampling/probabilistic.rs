//! Fixed-rate head sampling keyed on the trace id.
//!
//! The same trace id at the same rate always gets the same decision, so every
//! service that sees a trace agrees on whether to keep it.

use super::{sampled_at, Decision, HeadSampler, SamplingDecision};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilisticSampler {
    rate: f64,
}

impl ProbabilisticSampler {
    pub fn new(rate: f64) -> Result<Self, ValidationError> {
        ValidationError::check_range("rate", rate, 0.0, 1.0)?;
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 { self.rate }

    pub fn should_sample(&self, trace_id: Option<&str>) -> bool {
        sampled_at(self.rate, trace_id)
    }
}

impl HeadSampler for ProbabilisticSampler {
    fn decide(&self, trace_id: Option<&str>, _current_overhead: Option<f64>) -> SamplingDecision {
        let sampled = self.should_sample(trace_id);
        SamplingDecision {
            decision: Decision::from_bool(sampled),
            sample_rate: self.rate,
            reason: if sampled { "head_sampled" } else { "head_dropped" },
        }
    }

    fn current_rate(&self) -> f64 { self.rate }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range() {
        assert!(ProbabilisticSampler::new(-0.01).is_err());
        assert!(ProbabilisticSampler::new(1.01).is_err());
        assert!(ProbabilisticSampler::new(f64::NAN).is_err());
    }

    #[test]
    fn test_realized_fraction_near_rate() {
        let s = ProbabilisticSampler::new(0.3).unwrap();
        let sampled = (0..1_000).filter(|i| s.should_sample(Some(&format!("trace-{i}")))).count();
        let frac = sampled as f64 / 1_000.0;
        assert!((frac - 0.3).abs() <= 0.05, "realized {frac}");
    }

    #[test]
    fn test_same_id_same_decision() {
        let s = ProbabilisticSampler::new(0.5).unwrap();
        for i in 0..50 {
            let id = format!("req-{i}");
            assert_eq!(s.decide(Some(&id), None), s.decide(Some(&id), None));
        }
    }

    #[test]
    fn test_decision_carries_rate_and_reason() {
        let d = ProbabilisticSampler::new(1.0).unwrap().decide(Some("x"), None);
        assert_eq!(d.decision, Decision::Sample);
        assert_eq!(d.sample_rate, 1.0);
        assert_eq!(d.reason, "head_sampled");
    }
}
