//! Pipeline events: a strongly-typed, synchronously delivered stream.
//!
//! Events are observational; no component consumes them for control.
//! Within a stage, `StageStarted` precedes all nested events and
//! `StageCompleted` / `StageFailed` follows them. Observers receive
//! events in emission order on the engine's thread of control.

use std::sync::Mutex;

use crate::outcome::StageStatus;

/// One observational event from a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PipelineStarted {
        pipeline: String,
    },
    StageStarted {
        node_id: String,
        attempt: u32,
    },
    StageCompleted {
        node_id: String,
        status: StageStatus,
    },
    StageRetrying {
        node_id: String,
        attempt: u32,
    },
    StageFailed {
        node_id: String,
        reason: String,
    },
    EdgeSelected {
        from: String,
        to: String,
    },
    CheckpointSaved {
        node_id: String,
    },
    PipelineCompleted {
        pipeline: String,
        status: StageStatus,
    },
    PipelineAborted {
        pipeline: String,
        reason: String,
    },
}

/// Observer of pipeline events.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Discards everything.
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Buffers events for later inspection; the test workhorse.
#[derive(Default)]
pub struct CollectingEmitter {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one variant kind, by a predicate.
    pub fn filtered(&self, predicate: impl Fn(&PipelineEvent) -> bool) -> Vec<PipelineEvent> {
        self.snapshot().into_iter().filter(|e| predicate(e)).collect()
    }

    /// Node ids of `StageCompleted` events, in order.
    pub fn completed_ids(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::StageCompleted { node_id, .. } => Some(node_id),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for CollectingEmitter {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Forwards events to `tracing` at debug level.
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: PipelineEvent) {
        tracing::debug!(?event, "pipeline event");
    }
}
