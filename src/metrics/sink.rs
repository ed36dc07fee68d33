//! Pluggable destinations for execution events.
//!
//! The collector never depends on a concrete exporter. It forwards every
//! recorded execution to one injected [`MetricsSink`]; a failing sink is logged
//! and ignored.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use serde::Serialize;
use tracing::debug;

use crate::error::SinkError;

/// One execution as seen by a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub operation: String,
    pub duration: Duration,
    pub success: bool,
    pub cost: f64,
    pub savings: f64,
}

/// Capability interface for exporting execution events.
pub trait MetricsSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Accept one event. Must not block on I/O.
    fn record(&self, event: &ExecutionEvent) -> Result<(), SinkError>;
}

/// Discards everything. The collector's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn name(&self) -> &str { "noop" }

    fn record(&self, _event: &ExecutionEvent) -> Result<(), SinkError> { Ok(()) }
}

/// Emits each event as a `tracing` debug record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn name(&self) -> &str { "tracing" }

    fn record(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        debug!(
            operation = %event.operation,
            duration_ms = event.duration.as_secs_f64() * 1_000.0,
            success = event.success,
            cost = event.cost,
            savings = event.savings,
            "execution recorded"
        );
        Ok(())
    }
}

/// Keeps the most recent `capacity` events in memory.
#[derive(Debug)]
pub struct MemorySink {
    events: Mutex<VecDeque<ExecutionEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self { events: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    /// Copy of the buffered events, oldest first.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        match self.events.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl MetricsSink for MemorySink {
    fn name(&self) -> &str { "memory" }

    fn record(&self, event: &ExecutionEvent) -> Result<(), SinkError> {
        let mut guard = self.events.lock().map_err(|_| SinkError {
            sink: "memory".into(),
            reason: "buffer lock poisoned".into(),
        })?;
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: &str) -> ExecutionEvent {
        ExecutionEvent {
            operation: op.into(),
            duration: Duration::from_millis(5),
            success: true,
            cost: 0.0,
            savings: 0.0,
        }
    }

    #[test]
    fn test_noop_sink_accepts() {
        assert!(NoopSink.record(&event("a")).is_ok());
        assert_eq!(NoopSink.name(), "noop");
    }

    #[test]
    fn test_memory_sink_bounded() {
        let sink = MemorySink::new(2);
        for op in ["a", "b", "c"] {
            sink.record(&event(op)).unwrap();
        }
        let ops: Vec<_> = sink.events().into_iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec!["b", "c"]);
    }

    #[test]
    fn test_tracing_sink_accepts() {
        assert!(TracingSink.record(&event("a")).is_ok());
    }
}
