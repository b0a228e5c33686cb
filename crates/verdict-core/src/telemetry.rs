//! Lifecycle events for metric runs and batches. Observers are plain callbacks
//! attached by the caller; a panicking observer is caught and logged, never
//! surfaced to the evaluation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MetricStart {
        metric: String,
        unit_id: String,
    },
    MetricStop {
        metric: String,
        unit_id: String,
        duration: Duration,
        score: f64,
    },
    MetricException {
        metric: String,
        unit_id: String,
        duration: Duration,
        error: serde_json::Value,
    },
    BatchStart {
        unit_count: usize,
        metric_count: usize,
    },
    BatchStop {
        unit_count: usize,
        duration: Duration,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MetricStart { .. } => "metric.start",
            Event::MetricStop { .. } => "metric.stop",
            Event::MetricException { .. } => "metric.exception",
            Event::BatchStart { .. } => "batch.start",
            Event::BatchStop { .. } => "batch.stop",
        }
    }
}

/// Observer callback. Called synchronously on the emitting task, so keep it cheap.
pub type EventSink = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Telemetry {
    sinks: Vec<EventSink>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn attach(&mut self, sink: EventSink) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.name(), payload = ?event, "verdict telemetry");
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink(&event))).is_err() {
                tracing::warn!(event = event.name(), "telemetry observer panicked; event dropped");
            }
        }
    }
}
