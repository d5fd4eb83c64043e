//! Wait-human nodes: route on a human's answer.
//!
//! The option list is synthesized from outgoing-edge labels of the form
//! `[K] text` (the bracketed key becomes the answer key; an unbracketed
//! label is its own key). A skipped or unmatched answer fails the stage;
//! a matched one succeeds with `preferred_label` set to the full edge
//! label, which makes the subsequent edge selection deterministic.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::{EngineServices, Handler};
use crate::interviewer::{AnswerValue, AskOption};
use crate::outcome::Outcome;
use crate::vars::expand_in_context;

pub struct WaitHumanHandler;

#[async_trait]
impl Handler for WaitHumanHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let mut options: Vec<AskOption> = Vec::new();
        for edge in services.graph.outgoing(&node.id) {
            let Some(label) = edge.label() else { continue };
            let key = edge.label_key().unwrap_or(label);
            options.push(AskOption::new(key, label));
        }

        if options.is_empty() {
            return Ok(Outcome::fail(format!(
                "wait-human node '{}' has no labeled outgoing edges",
                node.id
            )));
        }

        let prompt = expand_in_context(node.label(), context);
        // A cancellation must unblock a pending human question.
        let answer = tokio::select! {
            answer = services.interviewer.ask(&prompt, &options) => answer?,
            _ = services.cancellation.cancelled() => {
                return Err(crate::error::PipelineError::Cancelled);
            }
        };

        let key = match answer.value {
            AnswerValue::Skipped => {
                return Ok(Outcome::fail("human skipped/invalid"));
            }
            AnswerValue::Key(key) => key,
        };

        let Some(chosen) = options.iter().find(|option| option.key == key) else {
            return Ok(Outcome::fail("human skipped/invalid"));
        };

        Ok(Outcome::success().with_preferred_label(chosen.label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::services_fixture;
    use crate::graph::{Graph, RawEdge, RawGraph, RawNode};
    use crate::interviewer::QueueInterviewer;
    use crate::outcome::StageStatus;
    use std::sync::Arc;

    fn approval_graph() -> Graph {
        Graph::compile(
            RawGraph::new("g")
                .with_node(RawNode::new("s").with_shape("Mdiamond"))
                .with_node(RawNode::new("gate").with_shape("hexagon"))
                .with_node(RawNode::new("apply").with_shape("box").with_attr("prompt", "p"))
                .with_node(RawNode::new("reject").with_shape("box").with_attr("prompt", "p"))
                .with_node(RawNode::new("e").with_shape("Msquare"))
                .with_edge(RawEdge::new("s", "gate"))
                .with_edge(RawEdge::new("gate", "apply").with_attr("label", "[A] Approve"))
                .with_edge(RawEdge::new("gate", "reject").with_attr("label", "[R] Reject"))
                .with_edge(RawEdge::new("apply", "e"))
                .with_edge(RawEdge::new("reject", "e")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn matched_key_sets_preferred_label() {
        let graph = approval_graph();
        let fixture = services_fixture(&graph)
            .with_interviewer(Arc::new(QueueInterviewer::with_keys(["A"])));
        let services = fixture.services();

        let outcome = WaitHumanHandler
            .execute(graph.node("gate").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.preferred_label.as_deref(), Some("[A] Approve"));
    }

    #[tokio::test]
    async fn skip_and_unknown_key_fail() {
        let graph = approval_graph();

        let fixture = services_fixture(&graph)
            .with_interviewer(Arc::new(QueueInterviewer::new()));
        let services = fixture.services();
        let outcome = WaitHumanHandler
            .execute(graph.node("gate").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.failure_reason.as_deref(), Some("human skipped/invalid"));

        let fixture = services_fixture(&graph)
            .with_interviewer(Arc::new(QueueInterviewer::with_keys(["Z"])));
        let services = fixture.services();
        let outcome = WaitHumanHandler
            .execute(graph.node("gate").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
