//! Types for pair cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::{StageError, Status};

/// Errors that fail a whole cycle.
///
/// Per-item and per-source failures never show up here; they are contained
/// and counted in the [`CycleReport`].
#[derive(Debug, Error)]
pub enum PairError {
    /// A concurrency limit of zero would never let anything run.
    #[error("invalid {side} concurrency for pair {pair}: must be at least 1")]
    InvalidConcurrency { pair: String, side: &'static str },

    /// A sink queue with no room would never accept an item.
    #[error("invalid queue capacity for sink {sink} in pair {pair}: must be at least 1")]
    InvalidCapacity { pair: String, sink: String },

    /// A download loop died outside of sink containment.
    #[error("download task for sink {sink} in pair {pair} failed: {reason}")]
    SinkTaskFailed {
        pair: String,
        sink: String,
        reason: String,
    },
}

/// What one source contributed to a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReport {
    /// Source name.
    pub source: String,
    /// Items pulled from the source and fanned out.
    pub fed: usize,
    /// Whether the source ended with an error or panic.
    pub failed: bool,
}

/// What one sink did during a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    /// Sink name.
    pub sink: String,
    /// Items handed to the sink.
    pub consumed: usize,
    /// Items that finished with [`Status::Success`].
    pub succeeded: usize,
    /// Items a filter in front of the sink dropped.
    pub skipped: usize,
    /// Items that finished with a failing status, an error or a panic.
    pub failed: usize,
}

impl SinkReport {
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, outcome: &Result<Status, StageError>) {
        self.consumed += 1;
        match outcome {
            Ok(Status::Success) => self.succeeded += 1,
            Ok(Status::Skipped) => self.skipped += 1,
            Ok(_) | Err(_) => self.failed += 1,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Pair name.
    pub pair: String,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// Wall time from start to fully drained.
    pub duration_ms: u64,
    /// One entry per source, in the order the sources were added.
    pub feeds: Vec<FeedReport>,
    /// One entry per sink, in the order the sinks were added.
    pub sinks: Vec<SinkReport>,
}

impl CycleReport {
    /// Items pulled from all sources.
    pub fn items_fed(&self) -> usize {
        self.feeds.iter().map(|f| f.fed).sum()
    }

    /// Sources that ended early.
    pub fn failed_sources(&self) -> usize {
        self.feeds.iter().filter(|f| f.failed).count()
    }

    /// Items handed to sinks, summed over all sinks.
    pub fn items_consumed(&self) -> usize {
        self.sinks.iter().map(|s| s.consumed).sum()
    }

    /// Failed sink invocations, summed over all sinks.
    pub fn failures(&self) -> usize {
        self.sinks.iter().map(|s| s.failed).sum()
    }

    pub fn sink(&self, name: &str) -> Option<&SinkReport> {
        self.sinks.iter().find(|s| s.sink == name)
    }
}
