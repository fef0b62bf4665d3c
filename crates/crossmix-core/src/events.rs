//! Structured domain events emitted by the grouper, the assembler and the batch analyzer.
//!
//! Components take a `&dyn EventSink` (or an `Arc` of one) instead of writing to a
//! global logger, so callers decide where events go and tests can assert on them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MixEvent {
    TrackSkipped {
        track: String,
        reason: String,
    },
    GroupOpened {
        index: usize,
        anchor_tempo: f64,
    },
    GroupClosed {
        index: usize,
        members: usize,
        average_tempo: f64,
    },
    AnalysisCompleted {
        track: String,
        tempo: f64,
        downbeats: usize,
    },
    AnalysisFailed {
        track: String,
        reason: String,
    },
    TrackRetimed {
        track: String,
        from_bpm: f64,
        target_bpm: f64,
        measured_bpm: f64,
    },
    TrackJoined {
        track: String,
        track_count: usize,
        composite_samples: usize,
        fade_out_samples: usize,
        fade_in_samples: usize,
    },
    JoinRejected {
        track: String,
        reason: String,
    },
    BatchCancelled {
        completed: usize,
        remaining: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: MixEvent);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: MixEvent) {
        match &event {
            MixEvent::TrackSkipped { track, reason } => {
                warn!(%track, %reason, "track skipped");
            }
            MixEvent::AnalysisFailed { track, reason } => {
                warn!(%track, %reason, "track analysis failed");
            }
            MixEvent::JoinRejected { track, reason } => {
                warn!(%track, %reason, "join rejected");
            }
            MixEvent::BatchCancelled {
                completed,
                remaining,
            } => {
                warn!(completed, remaining, "batch cancelled");
            }
            MixEvent::GroupOpened { .. } | MixEvent::GroupClosed { .. } => {
                debug!(?event, "grouping");
            }
            MixEvent::AnalysisCompleted { .. }
            | MixEvent::TrackRetimed { .. }
            | MixEvent::TrackJoined { .. } => {
                info!(?event, "mix event");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: MixEvent) {}
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MixEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<MixEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<MixEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: MixEvent) {
        self.events.lock().push(event);
    }
}
