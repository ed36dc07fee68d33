//! # Tracker: Windowed Throughput
//!
//! ## Responsibility
//! Tracks request starts and ends inside a rolling time window, an
//! active-request gauge, and a monotonic total.
//!
//! ## Guarantees
//! - Timestamps older than the window are purged before every read
//! - `total_requests` is never purged (only `reset` clears it)
//! - Ending an unknown request id is a no-op for the gauge

use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};

use serde::Serialize;

/// Default window used by the collector.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Snapshot returned by [`ThroughputTracker::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputStats {
    /// Starts inside the window divided by the window length.
    pub requests_per_second: f64,
    /// Ends inside the window divided by the window length.
    pub completions_per_second: f64,
    pub total_requests: u64,
    pub active_requests: usize,
    pub window_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct ThroughputTracker {
    window: Duration,
    start_timestamps: VecDeque<Instant>,
    end_timestamps: VecDeque<Instant>,
    active: HashSet<String>,
    total_requests: u64,
}

impl ThroughputTracker {
    /// A zero window is widened to one millisecond to keep the rate finite.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            start_timestamps: VecDeque::new(),
            end_timestamps: VecDeque::new(),
            active: HashSet::new(),
            total_requests: 0,
        }
    }

    pub fn window(&self) -> Duration { self.window }

    pub fn record_request_start(&mut self, request_id: impl Into<String>) {
        self.active.insert(request_id.into());
        self.start_timestamps.push_back(Instant::now());
        self.total_requests += 1;
    }

    pub fn record_request_end(&mut self, request_id: &str) {
        self.active.remove(request_id);
        self.end_timestamps.push_back(Instant::now());
    }

    /// A finished request that was never tracked as active.
    pub fn record_completed(&mut self) {
        let now = Instant::now();
        self.start_timestamps.push_back(now);
        self.end_timestamps.push_back(now);
        self.total_requests += 1;
    }

    pub fn active_requests(&self) -> usize { self.active.len() }

    pub fn get_stats(&mut self) -> ThroughputStats {
        self.purge(Instant::now());
        let secs = self.window.as_secs_f64();
        ThroughputStats {
            requests_per_second: self.start_timestamps.len() as f64 / secs,
            completions_per_second: self.end_timestamps.len() as f64 / secs,
            total_requests: self.total_requests,
            active_requests: self.active.len(),
            window_seconds: secs,
        }
    }

    pub fn reset(&mut self) {
        self.start_timestamps.clear();
        self.end_timestamps.clear();
        self.active.clear();
        self.total_requests = 0;
    }

    fn purge(&mut self, now: Instant) {
        let window = self.window;
        let expired = |t: &Instant| now.duration_since(*t) > window;
        while self.start_timestamps.front().is_some_and(expired) {
            self.start_timestamps.pop_front();
        }
        while self.end_timestamps.front().is_some_and(expired) {
            self.end_timestamps.pop_front();
        }
    }
}

impl Default for ThroughputTracker {
    fn default() -> Self { Self::new(DEFAULT_WINDOW) }
}
