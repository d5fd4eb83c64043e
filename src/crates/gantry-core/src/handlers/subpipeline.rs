//! Sub-pipeline nodes: run a nested graph to completion.
//!
//! The nested engine inherits the parent's backend, interviewer, emitter,
//! cancellation token, and a child log store. It starts from a deep copy
//! of the parent context; its final context merges back under the node's
//! id as a namespace prefix. The nested completion status becomes this
//! node's outcome.

use async_trait::async_trait;

use crate::context::Context;
use crate::engine::{Engine, EngineConfig, PipelineStatus};
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::{EngineServices, Handler};
use crate::outcome::Outcome;

pub struct SubPipelineHandler;

#[async_trait]
impl Handler for SubPipelineHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let Some(subgraph) = &node.subgraph else {
            return Ok(Outcome::fail(format!(
                "sub-pipeline node '{}' has no nested graph",
                node.id
            )));
        };

        let mut config = EngineConfig::new()
            .with_interviewer(services.interviewer.clone())
            .with_log_store(services.log_store.child(&node.id))
            .with_emitter(services.emitter.clone())
            .with_cancellation(services.cancellation.clone())
            .with_parallel_mode(services.parallel_mode)
            .with_initial_context(context.deep_copy());
        if let Some(backend) = &services.backend {
            config = config.with_backend(backend.clone());
        }

        tracing::debug!(node = %node.id, nested = %subgraph.name, "sub-pipeline run");
        let result = Engine::new(config).run_from_graph(subgraph).await?;

        let mut outcome = match result.status {
            PipelineStatus::Completed => Outcome::success(),
            PipelineStatus::Failed => Outcome::fail(
                result
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "sub-pipeline failed".to_string()),
            ),
            PipelineStatus::Aborted => Outcome::fail("sub-pipeline aborted"),
        };

        // Namespace the child's final context under this node's id.
        for (key, value) in result.context.iter() {
            outcome
                .context_updates
                .insert(format!("{}.{}", node.id, key), value.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::services_fixture;
    use crate::graph::{Graph, RawEdge, RawGraph, RawNode};
    use crate::handlers::codergen::ScriptedBackend;
    use crate::outcome::StageStatus;
    use std::sync::Arc;

    fn nested_raw() -> RawGraph {
        RawGraph::new("child")
            .with_attr("goal", "inner goal")
            .with_node(RawNode::new("cs").with_shape("Mdiamond"))
            .with_node(RawNode::new("work").with_shape("box").with_attr("prompt", "inner"))
            .with_node(RawNode::new("ce").with_shape("Msquare"))
            .with_edge(RawEdge::new("cs", "work"))
            .with_edge(RawEdge::new("work", "ce"))
    }

    fn outer_graph() -> Graph {
        let mut sub_node = RawNode::new("sub").with_shape("folder");
        sub_node.subgraph = Some(Box::new(nested_raw()));
        Graph::compile(
            RawGraph::new("outer")
                .with_node(RawNode::new("s").with_shape("Mdiamond"))
                .with_node(sub_node)
                .with_node(RawNode::new("e").with_shape("Msquare"))
                .with_edge(RawEdge::new("s", "sub"))
                .with_edge(RawEdge::new("sub", "e")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn nested_run_merges_namespaced_context() {
        let graph = outer_graph();
        let fixture = services_fixture(&graph)
            .with_backend(Arc::new(ScriptedBackend::text(vec!["nested done"])));
        let services = fixture.services();

        let outcome = SubPipelineHandler
            .execute(graph.node("sub").unwrap(), &Context::new(), &services)
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(
            outcome.context_updates["sub.last_output_full"],
            serde_json::json!("nested done")
        );
        assert_eq!(
            outcome.context_updates["sub.last_stage"],
            serde_json::json!("work")
        );
    }

    #[tokio::test]
    async fn nested_failure_becomes_fail_outcome() {
        let graph = outer_graph();
        let backend = ScriptedBackend::new(vec![crate::handlers::CodergenOutput::Outcome(
            Outcome::fail("inner exploded"),
        )]);
        let fixture = services_fixture(&graph).with_backend(Arc::new(backend));
        let services = fixture.services();

        let outcome = SubPipelineHandler
            .execute(graph.node("sub").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.failure_reason.as_deref(), Some("inner exploded"));
    }
}
