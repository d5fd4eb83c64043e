//! Node handlers: one per node kind.
//!
//! Every handler has the same signature: `(node, context, services) →
//! Outcome`. Handlers read the context but never write it directly; all
//! state changes travel back through `Outcome::context_updates` and are
//! merged by the engine. Unexpected handler failures are converted to
//! `FAIL` outcomes by the engine, never propagated as panics.

pub mod codergen;
pub mod conditional;
pub mod fanin;
pub mod human;
pub mod parallel;
pub mod passthrough;
pub mod subpipeline;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::graph::{Graph, Node, NodeKind};
use crate::interviewer::Interviewer;
use crate::logstore::LogStore;
use crate::outcome::Outcome;
use gantry_llm::CancellationToken;

pub use codergen::{CodergenBackend, CodergenHandler, CodergenOutput, ScriptedBackend};
pub use conditional::ConditionalHandler;
pub use fanin::FanInHandler;
pub use human::WaitHumanHandler;
pub use parallel::{ParallelHandler, ParallelMode};
pub use passthrough::PassthroughHandler;
pub use subpipeline::SubPipelineHandler;

/// What the engine lends a handler for the duration of one stage.
pub struct EngineServices<'a> {
    pub graph: &'a Graph,
    pub registry: &'a HandlerRegistry,
    pub backend: Option<Arc<dyn CodergenBackend>>,
    pub interviewer: Arc<dyn Interviewer>,
    pub log_store: Arc<dyn LogStore>,
    pub emitter: Arc<dyn EventEmitter>,
    pub cancellation: CancellationToken,
    pub parallel_mode: ParallelMode,
    /// Zero-based attempt number of the current work item.
    pub attempt: u32,
}

/// A node-kind handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        services: &EngineServices<'_>,
    ) -> Result<Outcome>;
}

/// Kind → handler dispatch table.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// The standard table covering every node kind.
    pub fn standard() -> Self {
        let mut handlers: HashMap<NodeKind, Arc<dyn Handler>> = HashMap::new();
        handlers.insert(NodeKind::Start, Arc::new(PassthroughHandler));
        handlers.insert(NodeKind::Exit, Arc::new(PassthroughHandler));
        handlers.insert(NodeKind::Codergen, Arc::new(CodergenHandler));
        handlers.insert(NodeKind::Conditional, Arc::new(ConditionalHandler));
        handlers.insert(NodeKind::Parallel, Arc::new(ParallelHandler));
        handlers.insert(NodeKind::FanIn, Arc::new(FanInHandler));
        handlers.insert(NodeKind::WaitHuman, Arc::new(WaitHumanHandler));
        handlers.insert(NodeKind::SubPipeline, Arc::new(SubPipelineHandler));
        Self { handlers }
    }

    /// Replace the handler for one kind.
    pub fn with_handler(mut self, kind: NodeKind, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn resolve(&self, kind: NodeKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
