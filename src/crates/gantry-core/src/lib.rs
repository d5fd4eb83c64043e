//! # gantry-core - Pipeline Engine
//!
//! Executes directed pipelines of LLM-backed work described by a
//! declarative graph: compile an immutable [`Graph`] from a parser-facing
//! [`RawGraph`], validate it, and drive it to completion through a
//! queue-driven [`Engine`] that routes control among heterogeneous node
//! kinds.
//!
//! ## Node kinds
//!
//! - **codergen** (`box`) - one LLM request through a pluggable backend
//! - **conditional** (`diamond`) - passthrough; edges do the branching
//! - **parallel fan-out** (`component`) / **fan-in** (`tripleoctagon`) -
//!   sibling branches with best-outcome selection
//! - **wait-human** (`hexagon`) - routes on an [`Interviewer`] answer
//! - **sub-pipeline** (`folder`) - a nested engine run
//! - **start/exit** (`Mdiamond` / `Msquare`) - structural passthroughs
//!
//! A codergen node with `goal_gate=true` re-enqueues the graph's
//! `retry_target` on failure, enabling iterative refinement under a
//! pass/fail predicate.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gantry_core::{Engine, EngineConfig, Graph, RawGraph};
//!
//! #[tokio::main]
//! async fn main() -> gantry_core::Result<()> {
//!     let raw = RawGraph::from_yaml_file("pipeline.yaml")?;
//!     let graph = Graph::compile(raw)?;
//!     let result = Engine::new(EngineConfig::new()).run_from_graph(&graph).await?;
//!     println!("{:?}: {:?}", result.status, result.completed_nodes);
//!     Ok(())
//! }
//! ```
//!
//! Determinism is a design invariant: for a fixed graph, initial context,
//! interviewer script, and backend responses, the sequence of completed
//! stages and the final context are identical across runs. Checkpoints
//! written after every stage make any completed prefix resumable.

pub mod checkpoint;
pub mod context;
pub mod edge_select;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod handlers;
pub mod interviewer;
pub mod logstore;
pub mod outcome;
pub mod stylesheet;
pub mod validate;
pub mod vars;
pub mod visualize;
pub mod yaml;

// Re-export main types
pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use context::Context;
pub use edge_select::{candidate_edges, parse_condition, select_edge, Condition};
pub use engine::{Engine, EngineConfig, PipelineResult, PipelineStatus};
pub use error::{PipelineError, Result};
pub use events::{
    CollectingEmitter, EventEmitter, NoopEmitter, PipelineEvent, TracingEmitter,
};
pub use graph::{
    AttrValue, Edge, Graph, GraphFingerprint, GraphSource, Node, NodeId, NodeKind, RawEdge,
    RawGraph, RawNode,
};
pub use handlers::{
    CodergenBackend, CodergenOutput, EngineServices, Handler, HandlerRegistry, ParallelMode,
    ScriptedBackend,
};
pub use interviewer::{
    Answer, AnswerValue, AskOption, Interviewer, QueueInterviewer, SkippingInterviewer,
};
pub use logstore::{FsLogStore, LogStore, Manifest, MemoryLogStore};
pub use outcome::{Outcome, StageStatus};
pub use stylesheet::{ModelStylesheet, Rule, Selector};
pub use validate::{validate, ValidationWarning};
pub use visualize::{visualize, VisualizationFormat};
pub use yaml::YamlGraphSource;

// The engine shares the LLM core's cancellation primitive.
pub use gantry_llm::CancellationToken;
