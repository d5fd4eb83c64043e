//! The pipeline engine: a queue-driven execution loop.
//!
//! The engine is single-threaded cooperative: exactly one node handler
//! runs at a time, and handler boundaries are the only suspension
//! points. Work items are `(node_id, attempt)` pairs on a FIFO; retries
//! requeue at the head, successors at the tail. After every completed
//! stage the engine merges context updates, records the outcome, writes
//! a checkpoint, and routes through the edge selector.
//!
//! States: Idle → Running → (Completed | Failed | Aborted). A handler
//! FAIL on a goal-gate node re-enqueues the graph's `retry_target`
//! instead of failing the run, bounded by the gate's `max_retries`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::context::Context;
use crate::edge_select::select_edge;
use crate::error::{PipelineError, Result};
use crate::events::{EventEmitter, NoopEmitter, PipelineEvent};
use crate::graph::{Graph, GraphSource, NodeKind};
use crate::handlers::{
    CodergenBackend, EngineServices, HandlerRegistry, ParallelMode,
};
use crate::interviewer::{Interviewer, SkippingInterviewer};
use crate::logstore::{LogStore, Manifest, MemoryLogStore};
use crate::outcome::{Outcome, StageStatus};
use gantry_llm::CancellationToken;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    Failed,
    Aborted,
}

/// What a run hands back to the caller.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: BTreeMap<String, Outcome>,
    pub context: Context,
    pub failure_reason: Option<String>,
}

/// Configuration for one engine instance.
#[derive(Clone)]
pub struct EngineConfig {
    pub backend: Option<Arc<dyn CodergenBackend>>,
    pub interviewer: Arc<dyn Interviewer>,
    pub log_store: Arc<dyn LogStore>,
    pub emitter: Arc<dyn EventEmitter>,
    pub cancellation: CancellationToken,
    pub parallel_mode: ParallelMode,
    pub initial_context: Context,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            backend: None,
            interviewer: Arc::new(SkippingInterviewer),
            log_store: Arc::new(MemoryLogStore::new()),
            emitter: Arc::new(NoopEmitter),
            cancellation: CancellationToken::new(),
            parallel_mode: ParallelMode::Serial,
            initial_context: Context::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CodergenBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_interviewer(mut self, interviewer: Arc<dyn Interviewer>) -> Self {
        self.interviewer = interviewer;
        self
    }

    pub fn with_log_store(mut self, log_store: Arc<dyn LogStore>) -> Self {
        self.log_store = log_store;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_parallel_mode(mut self, mode: ParallelMode) -> Self {
        self.parallel_mode = mode;
        self
    }

    pub fn with_initial_context(mut self, context: Context) -> Self {
        self.initial_context = context;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkItem {
    node_id: String,
    attempt: u32,
}

/// Mutable state threaded through the run loop.
struct LoopState {
    context: Context,
    queue: VecDeque<WorkItem>,
    completed: Vec<String>,
    outcomes: BTreeMap<String, Outcome>,
    statuses: BTreeMap<String, StageStatus>,
    gate_retries: HashMap<String, u32>,
    started_at: String,
}

/// The pipeline engine.
pub struct Engine {
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: HandlerRegistry::standard(),
            config,
        }
    }

    pub fn with_registry(config: EngineConfig, registry: HandlerRegistry) -> Self {
        Self { registry, config }
    }

    /// Parse, compile, and run a pipeline from source text.
    pub async fn run_from_source(
        &self,
        text: &str,
        parser: &dyn GraphSource,
    ) -> Result<PipelineResult> {
        let raw = parser.parse(text)?;
        let graph = Graph::compile(raw)?;
        self.run_from_graph(&graph).await
    }

    /// Run a compiled graph from its start node.
    pub async fn run_from_graph(&self, graph: &Graph) -> Result<PipelineResult> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let mut context = self.config.initial_context.deep_copy();
        if !graph.goal.is_empty() && !context.contains("goal") {
            context.set("goal", Value::String(graph.goal.clone()));
        }

        self.config.log_store.write_manifest(&Manifest {
            name: graph.name.clone(),
            goal: graph.goal.clone(),
            node_count: graph.node_count(),
            started_at: started_at.clone(),
        })?;

        let state = LoopState {
            context,
            queue: VecDeque::from([WorkItem {
                node_id: graph.start_id.clone(),
                attempt: 0,
            }]),
            completed: Vec::new(),
            outcomes: BTreeMap::new(),
            statuses: BTreeMap::new(),
            gate_retries: HashMap::new(),
            started_at,
        };
        self.run_loop(graph, state).await
    }

    /// Resume a run from the checkpoint in this engine's log store.
    ///
    /// Verifies the graph fingerprint, replays the completed set into the
    /// context, and seeds the queue with the successors of the last
    /// completed node.
    pub async fn resume_from_checkpoint(&self, graph: &Graph) -> Result<PipelineResult> {
        let checkpoint = self
            .config
            .log_store
            .load_checkpoint()?
            .ok_or_else(|| PipelineError::Checkpoint("no checkpoint found".to_string()))?;
        checkpoint.verify(graph)?;

        let context = checkpoint.restore_context();
        let last_node = graph.require_node(&checkpoint.last_node)?;

        let mut outcomes = BTreeMap::new();
        for (node_id, status) in &checkpoint.outcomes {
            let outcome = match status {
                StageStatus::Fail => Outcome::fail("restored from checkpoint"),
                other => Outcome {
                    status: *other,
                    ..Outcome::success()
                },
            };
            outcomes.insert(node_id.clone(), outcome);
        }

        let mut state = LoopState {
            context,
            queue: VecDeque::new(),
            completed: checkpoint.completed.clone(),
            outcomes,
            statuses: checkpoint.outcomes.clone(),
            gate_retries: HashMap::new(),
            started_at: checkpoint.started_at.clone(),
        };

        if last_node.kind == NodeKind::Exit {
            self.config.emitter.emit(PipelineEvent::PipelineCompleted {
                pipeline: graph.name.clone(),
                status: StageStatus::Success,
            });
            return Ok(self.build_result(PipelineStatus::Completed, state, None));
        }

        // Route from the last completed node with its recorded outcome;
        // the restored context still carries `preferred_label`.
        let mut last_outcome = state
            .outcomes
            .get(&checkpoint.last_node)
            .cloned()
            .unwrap_or_else(Outcome::success);
        let preferred = state.context.get_string("preferred_label", "");
        if !preferred.is_empty() {
            last_outcome.preferred_label = Some(preferred);
        }

        let next = if last_node.kind == NodeKind::Parallel {
            graph.continuation_edge(&last_node.id)
        } else {
            select_edge(graph, &last_node.id, &last_outcome, &state.context)
        };
        let Some(edge) = next else {
            return Ok(self.build_result(
                PipelineStatus::Failed,
                state,
                Some(format!("no edge matched from {}", checkpoint.last_node)),
            ));
        };
        state.queue.push_back(WorkItem {
            node_id: edge.to.clone(),
            attempt: 0,
        });

        self.run_loop(graph, state).await
    }

    fn services<'a>(&'a self, graph: &'a Graph, attempt: u32) -> EngineServices<'a> {
        EngineServices {
            graph,
            registry: &self.registry,
            backend: self.config.backend.clone(),
            interviewer: self.config.interviewer.clone(),
            log_store: self.config.log_store.clone(),
            emitter: self.config.emitter.clone(),
            cancellation: self.config.cancellation.clone(),
            parallel_mode: self.config.parallel_mode,
            attempt,
        }
    }

    async fn run_loop(&self, graph: &Graph, mut state: LoopState) -> Result<PipelineResult> {
        let emitter = &self.config.emitter;
        emitter.emit(PipelineEvent::PipelineStarted {
            pipeline: graph.name.clone(),
        });

        while let Some(item) = state.queue.pop_front() {
            // Cancellation is checked between handler invocations.
            if self.config.cancellation.is_cancelled() {
                emitter.emit(PipelineEvent::PipelineAborted {
                    pipeline: graph.name.clone(),
                    reason: "cancelled".to_string(),
                });
                return Ok(self.build_result(
                    PipelineStatus::Aborted,
                    state,
                    Some("cancelled".to_string()),
                ));
            }

            let node = match graph.node(&item.node_id) {
                Some(node) => node,
                None => {
                    return Ok(self.finish_failed(
                        graph,
                        state,
                        format!("queued node '{}' not found", item.node_id),
                    ));
                }
            };

            emitter.emit(PipelineEvent::StageStarted {
                node_id: node.id.clone(),
                attempt: item.attempt,
            });
            tracing::debug!(node = %node.id, attempt = item.attempt, "stage started");

            let Some(handler) = self.registry.resolve(node.kind) else {
                return Ok(self.finish_failed(
                    graph,
                    state,
                    format!("no handler registered for kind {:?}", node.kind),
                ));
            };

            let services = self.services(graph, item.attempt);
            // Unexpected handler failures become FAIL outcomes; a
            // cancellation surfacing from inside a handler aborts the run.
            let mut outcome = match handler.execute(node, &state.context, &services).await {
                Ok(outcome) => outcome,
                Err(PipelineError::Cancelled) => {
                    emitter.emit(PipelineEvent::PipelineAborted {
                        pipeline: graph.name.clone(),
                        reason: "cancelled".to_string(),
                    });
                    return Ok(self.build_result(
                        PipelineStatus::Aborted,
                        state,
                        Some("cancelled".to_string()),
                    ));
                }
                Err(error) => Outcome::fail(error.to_string()),
            };

            // Retry handling: requeue at the head while attempts remain;
            // exhausted retries degrade to PARTIAL_SUCCESS or FAIL.
            if outcome.status == StageStatus::Retry {
                if item.attempt < node.max_retries() {
                    emitter.emit(PipelineEvent::StageRetrying {
                        node_id: node.id.clone(),
                        attempt: item.attempt + 1,
                    });
                    state.queue.push_front(WorkItem {
                        node_id: item.node_id,
                        attempt: item.attempt + 1,
                    });
                    continue;
                }
                outcome = if node.allow_partial() {
                    Outcome {
                        status: StageStatus::PartialSuccess,
                        ..outcome
                    }
                } else {
                    Outcome::fail(format!(
                        "retries exhausted after {} attempts",
                        item.attempt + 1
                    ))
                };
            }

            self.config.log_store.write_outcome(&node.id, &outcome)?;

            match outcome.status {
                StageStatus::Success | StageStatus::PartialSuccess | StageStatus::Skipped => {
                    // Exit nodes are structural markers: they complete the
                    // run without entering the completed set or moving the
                    // checkpoint.
                    if node.kind == NodeKind::Exit {
                        emitter.emit(PipelineEvent::StageCompleted {
                            node_id: node.id.clone(),
                            status: outcome.status,
                        });
                        emitter.emit(PipelineEvent::PipelineCompleted {
                            pipeline: graph.name.clone(),
                            status: outcome.status,
                        });
                        return Ok(self.build_result(PipelineStatus::Completed, state, None));
                    }

                    if outcome.status != StageStatus::Skipped {
                        state.context.apply_updates(&outcome.context_updates);
                    }
                    state.context.set(
                        "outcome",
                        Value::String(outcome.status.as_str().to_string()),
                    );
                    state
                        .context
                        .set("last_stage", Value::String(node.id.clone()));
                    // Always overwrite to clear stale labels from earlier
                    // stages.
                    state.context.set(
                        "preferred_label",
                        Value::String(
                            outcome.preferred_label.clone().unwrap_or_default(),
                        ),
                    );

                    state.completed.push(node.id.clone());
                    state.statuses.insert(node.id.clone(), outcome.status);
                    state.outcomes.insert(node.id.clone(), outcome.clone());

                    emitter.emit(PipelineEvent::StageCompleted {
                        node_id: node.id.clone(),
                        status: outcome.status,
                    });

                    let checkpoint = Checkpoint::capture(
                        graph,
                        &node.id,
                        &state.completed,
                        &state.statuses,
                        &state.context,
                        &state.started_at,
                    );
                    self.config.log_store.save_checkpoint(&checkpoint)?;
                    emitter.emit(PipelineEvent::CheckpointSaved {
                        node_id: node.id.clone(),
                    });

                    let next = if node.kind == NodeKind::Parallel {
                        graph.continuation_edge(&node.id)
                    } else {
                        select_edge(graph, &node.id, &outcome, &state.context)
                    };
                    match next {
                        Some(edge) => {
                            emitter.emit(PipelineEvent::EdgeSelected {
                                from: edge.from.clone(),
                                to: edge.to.clone(),
                            });
                            state.queue.push_back(WorkItem {
                                node_id: edge.to.clone(),
                                attempt: 0,
                            });
                        }
                        None => {
                            return Ok(self.finish_failed(
                                graph,
                                state,
                                format!("no edge matched from {}", node.id),
                            ));
                        }
                    }
                }
                StageStatus::Fail => {
                    let reason = outcome
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "stage failed".to_string());
                    emitter.emit(PipelineEvent::StageFailed {
                        node_id: node.id.clone(),
                        reason: reason.clone(),
                    });
                    state.statuses.insert(node.id.clone(), StageStatus::Fail);
                    state.outcomes.insert(node.id.clone(), outcome.clone());

                    // Goal gates re-enqueue the retry target and keep the
                    // run alive, bounded by the gate's max_retries.
                    if node.goal_gate() {
                        if let Some(target) = graph.retry_target() {
                            let entry =
                                state.gate_retries.entry(node.id.clone()).or_insert(0);
                            if *entry < node.max_retries() && graph.node(target).is_some() {
                                *entry += 1;
                                tracing::debug!(
                                    gate = %node.id,
                                    target,
                                    attempt = *entry,
                                    "goal gate re-enqueue"
                                );
                                state.queue.push_back(WorkItem {
                                    node_id: target.to_string(),
                                    attempt: 0,
                                });
                                continue;
                            }
                        }
                    }

                    return Ok(self.finish_failed(graph, state, reason));
                }
                StageStatus::Retry => unreachable!("retry handled above"),
            }
        }

        Ok(self.finish_failed(
            graph,
            state,
            "work queue drained before reaching an exit node".to_string(),
        ))
    }

    fn finish_failed(
        &self,
        graph: &Graph,
        state: LoopState,
        reason: String,
    ) -> PipelineResult {
        self.config.emitter.emit(PipelineEvent::PipelineCompleted {
            pipeline: graph.name.clone(),
            status: StageStatus::Fail,
        });
        self.build_result(PipelineStatus::Failed, state, Some(reason))
    }

    fn build_result(
        &self,
        status: PipelineStatus,
        state: LoopState,
        failure_reason: Option<String>,
    ) -> PipelineResult {
        PipelineResult {
            status,
            completed_nodes: state.completed,
            node_outcomes: state.outcomes,
            context: state.context,
            failure_reason,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by handler unit tests.

    use super::*;

    pub(crate) struct ServicesFixture<'g> {
        graph: &'g Graph,
        registry: HandlerRegistry,
        backend: Option<Arc<dyn CodergenBackend>>,
        interviewer: Arc<dyn Interviewer>,
        log_store: Arc<dyn LogStore>,
        emitter: Arc<dyn EventEmitter>,
        cancellation: CancellationToken,
        parallel_mode: ParallelMode,
    }

    impl<'g> ServicesFixture<'g> {
        pub(crate) fn with_backend(mut self, backend: Arc<dyn CodergenBackend>) -> Self {
            self.backend = Some(backend);
            self
        }

        pub(crate) fn with_interviewer(mut self, interviewer: Arc<dyn Interviewer>) -> Self {
            self.interviewer = interviewer;
            self
        }

        pub(crate) fn with_log_store(mut self, log_store: Arc<dyn LogStore>) -> Self {
            self.log_store = log_store;
            self
        }

        pub(crate) fn with_parallel_mode(mut self, mode: ParallelMode) -> Self {
            self.parallel_mode = mode;
            self
        }

        pub(crate) fn services(&self) -> EngineServices<'_> {
            EngineServices {
                graph: self.graph,
                registry: &self.registry,
                backend: self.backend.clone(),
                interviewer: self.interviewer.clone(),
                log_store: self.log_store.clone(),
                emitter: self.emitter.clone(),
                cancellation: self.cancellation.clone(),
                parallel_mode: self.parallel_mode,
                attempt: 0,
            }
        }
    }

    pub(crate) fn services_fixture(graph: &Graph) -> ServicesFixture<'_> {
        ServicesFixture {
            graph,
            registry: HandlerRegistry::standard(),
            backend: None,
            interviewer: Arc::new(SkippingInterviewer),
            log_store: Arc::new(MemoryLogStore::new()),
            emitter: Arc::new(NoopEmitter),
            cancellation: CancellationToken::new(),
            parallel_mode: ParallelMode::Serial,
        }
    }
}
