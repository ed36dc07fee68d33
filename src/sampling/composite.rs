//! # Stage: Composite Sampler
//!
//! ## Responsibility
//! Pairs a head sampler (decided at trace start) with the tail rules (decided
//! at trace end) and keeps the head decisions of in-flight traces.
//!
//! ## Guarantees
//! - Upgrade only: a head SAMPLE is never downgraded; a head DROP becomes
//!   SAMPLE only through the tail error / slow rules
//! - Bounded: at most `pending_capacity` head decisions are held; the oldest
//!   is forgotten first
//! - O(1) amortized `start_trace` / `end_trace`: finished traces leave a stale
//!   slot in the eviction queue that is skipped or compacted away later
//!
//! ## NOT Responsible For
//! - Propagating decisions across services (the hash rule makes them agree)

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use serde::Serialize;

use super::{
    AdaptiveSampler, AdaptiveSamplerStats, Decision, HeadSampler, ProbabilisticSampler, SamplingConfig,
    SamplingDecision, TailBasedSampler,
};
use crate::error::ValidationError;

pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeStats {
    pub head_rate: f64,
    pub pending: usize,
    pub sampled: u64,
    pub dropped: u64,
    /// Traces dropped at head and kept by a tail rule.
    pub upgraded: u64,
    pub adaptive: Option<AdaptiveSamplerStats>,
}

enum Head {
    Fixed(ProbabilisticSampler),
    Adaptive(AdaptiveSampler),
    Custom(Box<dyn HeadSampler>),
}

impl Head {
    fn sampler(&self) -> &dyn HeadSampler {
        match self {
            Head::Fixed(s) => s,
            Head::Adaptive(s) => s,
            Head::Custom(s) => s.as_ref(),
        }
    }
}

/// Head decisions of in-flight traces. `order` is the eviction queue; each
/// slot carries the sequence number of the insert that queued it and is live
/// only while `decisions` still holds that same sequence for the id.
#[derive(Default)]
struct Pending {
    decisions: HashMap<String, (u64, SamplingDecision)>,
    order: VecDeque<(u64, String)>,
    next_seq: u64,
}

impl Pending {
    fn insert(&mut self, id: &str, head: SamplingDecision, capacity: usize) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.decisions.insert(id.to_string(), (seq, head));
        self.order.push_back((seq, id.to_string()));
        while self.decisions.len() > capacity {
            let Some((seq, old)) = self.order.pop_front() else { break };
            if self.is_live(seq, &old) {
                self.decisions.remove(&old);
            }
        }
        self.compact();
    }

    fn take(&mut self, id: &str) -> Option<SamplingDecision> {
        let (_, head) = self.decisions.remove(id)?;
        self.compact();
        Some(head)
    }

    fn is_live(&self, seq: u64, id: &str) -> bool {
        self.decisions.get(id).is_some_and(|(s, _)| *s == seq)
    }

    /// Drop stale slots once they outnumber live ones.
    fn compact(&mut self) {
        if self.order.len() <= 2 * self.decisions.len() + 16 {
            return;
        }
        let decisions = &self.decisions;
        self.order.retain(|(seq, id)| decisions.get(id).is_some_and(|(s, _)| s == seq));
    }
}

pub struct CompositeSampler {
    head: Head,
    tail: TailBasedSampler,
    pending: Mutex<Pending>,
    pending_capacity: usize,
    sampled: AtomicU64,
    dropped: AtomicU64,
    upgraded: AtomicU64,
}

impl CompositeSampler {
    pub fn new(head: Box<dyn HeadSampler>, tail: TailBasedSampler) -> Self {
        Self::with_head(Head::Custom(head), tail)
    }

    pub fn probabilistic(head: ProbabilisticSampler, tail: TailBasedSampler) -> Self {
        Self::with_head(Head::Fixed(head), tail)
    }

    pub fn adaptive(head: AdaptiveSampler, tail: TailBasedSampler) -> Self {
        Self::with_head(Head::Adaptive(head), tail)
    }

    /// Adaptive head when `adaptive_enabled`, otherwise fixed at `default_rate`.
    pub fn from_config(config: &SamplingConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        let tail = TailBasedSampler::new(
            config.always_sample_errors,
            config.always_sample_slow,
            config.slow_threshold_ms,
        )?;
        Ok(if config.adaptive_enabled {
            Self::adaptive(
                AdaptiveSampler::new(
                    config.default_rate,
                    config.adaptive_min_rate,
                    config.adaptive_max_rate,
                    config.adaptive_target_overhead,
                    config.adjustment_interval(),
                )?,
                tail,
            )
        } else {
            Self::probabilistic(ProbabilisticSampler::new(config.default_rate)?, tail)
        })
    }

    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity.max(1);
        self
    }

    fn with_head(head: Head, tail: TailBasedSampler) -> Self {
        Self {
            head,
            tail,
            pending: Mutex::new(Pending::default()),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            sampled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            upgraded: AtomicU64::new(0),
        }
    }

    /// Head decision at trace start. Kept until `end_trace` for the same id.
    pub fn start_trace(&self, trace_id: Option<&str>, current_overhead: Option<f64>) -> SamplingDecision {
        let head = self.head.sampler().decide(trace_id, current_overhead);
        if let Some(id) = trace_id {
            self.lock().insert(id, head, self.pending_capacity);
        }
        head
    }

    /// Final decision at trace end. A trace with no remembered head decision
    /// is treated as dropped at head.
    pub fn end_trace(&self, trace_id: Option<&str>, has_error: bool, duration_ms: f64) -> SamplingDecision {
        let head = trace_id.and_then(|id| self.lock().take(id));
        let head = head.unwrap_or(SamplingDecision { decision: Decision::Drop, sample_rate: 0.0, reason: "head_dropped" });

        let fin = self.compose(&head, has_error, duration_ms);
        if fin.is_sampled() {
            self.sampled.fetch_add(1, Ordering::Relaxed);
            if !head.is_sampled() {
                self.upgraded.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        fin
    }

    /// Combine a head decision with the tail rules.
    pub fn compose(&self, head: &SamplingDecision, has_error: bool, duration_ms: f64) -> SamplingDecision {
        if head.is_sampled() {
            return SamplingDecision { decision: Decision::Sample, sample_rate: head.sample_rate, reason: "head_sampled" };
        }
        let tail = self.tail.decide(None, has_error, duration_ms);
        SamplingDecision { decision: tail.decision, sample_rate: head.sample_rate, reason: tail.reason }
    }

    pub fn head_rate(&self) -> f64 {
        self.head.sampler().current_rate()
    }

    pub fn stats(&self) -> CompositeStats {
        CompositeStats {
            head_rate: self.head_rate(),
            pending: self.lock().decisions.len(),
            sampled: self.sampled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            upgraded: self.upgraded.load(Ordering::Relaxed),
            adaptive: match &self.head {
                Head::Adaptive(s) => Some(s.get_stats()),
                _ => None,
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CompositeSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSampler")
            .field("head_rate", &self.head.sampler().current_rate())
            .field("tail", &self.tail)
            .field("pending_capacity", &self.pending_capacity)
            .finish()
    }
}
