//! # Tracker: Percentile Latency
//!
//! ## Responsibility
//! Keeps a bounded FIFO reservoir of latency samples (seconds) for one
//! operation and answers p50/p90/p95/p99 queries with nearest-rank semantics.
//!
//! ## Guarantees
//! - Bounded: at most `max_samples` samples are retained; the oldest goes first
//! - O(1) record; queries sort a snapshot copy and never reorder the reservoir
//! - Exact nearest-rank: `index = floor(p * (n - 1))`, no interpolation
//!
//! ## NOT Responsible For
//! - Locking (the collector wraps each tracker in its own mutex)

use serde::Serialize;

/// Default reservoir size used by the collector.
pub const DEFAULT_MAX_SAMPLES: usize = 1_000;

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer of `f64` samples.
///
/// Evicts the oldest entry when full. All mutations are O(1).
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Vec<f64>,
    head: usize,
    len: usize,
    cap: usize,
}

impl RingBuffer {
    /// A zero capacity is bumped to one so `push` can never index out of range.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self { buf: vec![0.0; cap], head: 0, len: 0, cap }
    }

    /// Push a sample, evicting the oldest when full.
    pub fn push(&mut self, value: f64) {
        self.buf[self.head] = value;
        self.head = (self.head + 1) % self.cap;
        if self.len < self.cap {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn capacity(&self) -> usize { self.cap }

    /// Iterate samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let start = if self.len == self.cap { self.head } else { 0 };
        (0..self.len).map(move |i| self.buf[(start + i) % self.cap])
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Percentiles
// ---------------------------------------------------------------------------

/// Latency percentiles in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Nearest-rank percentile of an already sorted slice.
///
/// `p` is a fraction in `[0, 1]`. Returns 0.0 for an empty slice.
pub fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Bounded latency reservoir for one named operation.
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    name: String,
    reservoir: RingBuffer,
}

impl PercentileTracker {
    pub fn new(name: impl Into<String>, max_samples: usize) -> Self {
        Self { name: name.into(), reservoir: RingBuffer::new(max_samples) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn max_samples(&self) -> usize { self.reservoir.capacity() }

    pub fn len(&self) -> usize { self.reservoir.len() }

    pub fn is_empty(&self) -> bool { self.reservoir.is_empty() }

    /// Record one latency observation. Non-finite values are dropped.
    pub fn record_latency(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        self.reservoir.push(seconds);
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.reservoir.iter().collect()
    }

    pub fn get_percentiles(&self) -> Percentiles {
        if self.reservoir.is_empty() {
            return Percentiles::default();
        }
        let mut sorted = self.samples();
        sorted.sort_by(f64::total_cmp);
        Percentiles {
            p50: nearest_rank(&sorted, 0.50),
            p90: nearest_rank(&sorted, 0.90),
            p95: nearest_rank(&sorted, 0.95),
            p99: nearest_rank(&sorted, 0.99),
        }
    }

    pub fn reset(&mut self) {
        self.reservoir.clear();
    }
}
