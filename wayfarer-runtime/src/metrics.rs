//! Metrics for model calls, tool runs and turns.
//!
//! Everything goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops.

use std::time::{Duration, Instant};

/// Latency histograms, recorded in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Histogram {
    ModelLatency,
    ToolLatency,
    TurnDuration,
    /// Time spent waiting for a busy thread under the queue policy.
    TurnWait,
}

impl Histogram {
    pub fn name(self) -> &'static str {
        match self {
            Histogram::ModelLatency => "model_request_latency",
            Histogram::ToolLatency => "tool_execution_latency",
            Histogram::TurnDuration => "turn_duration",
            Histogram::TurnWait => "turn_wait_duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Compactions,
    Fallbacks,
    ToolRefusals,
    FailedTurns,
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Counter::Compactions => "compaction_count",
            Counter::Fallbacks => "model_fallback_count",
            Counter::ToolRefusals => "tool_call_refused_count",
            Counter::FailedTurns => "turn_failed_count",
        }
    }
}

pub fn record(histogram: Histogram, elapsed: Duration) {
    metrics::histogram!(histogram.name(), elapsed.as_secs_f64() * 1000.0);
}

pub fn increment(counter: Counter) {
    metrics::counter!(counter.name(), 1);
}

/// Records elapsed time into a histogram when dropped.
pub struct MetricTimer {
    start: Instant,
    histogram: Histogram,
}

impl MetricTimer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        record(self.histogram, self.start.elapsed());
    }
}
