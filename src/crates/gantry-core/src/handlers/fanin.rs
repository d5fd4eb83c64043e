//! Fan-in nodes: adopt the best parallel branch.
//!
//! Reads `parallel.results` (written by the fan-out handler), ranks the
//! branches SUCCESS > PARTIAL_SUCCESS > FAIL with weight then source
//! order as tiebreaks, and merges the winner's context updates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::parallel::BranchRecord;
use crate::handlers::{EngineServices, Handler};
use crate::outcome::Outcome;

pub struct FanInHandler;

#[async_trait]
impl Handler for FanInHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        _services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let Some(results) = context.get("parallel.results") else {
            return Ok(Outcome::fail(format!(
                "fan-in node '{}' found no parallel results",
                node.id
            )));
        };

        let records: Vec<BranchRecord> = match serde_json::from_value(results.clone()) {
            Ok(records) => records,
            Err(error) => {
                return Ok(Outcome::fail(format!(
                    "fan-in node '{}' could not read parallel results: {error}",
                    node.id
                )));
            }
        };
        let Some(best) = BranchRecord::best(&records) else {
            return Ok(Outcome::fail(format!(
                "fan-in node '{}' found no branches to merge",
                node.id
            )));
        };

        let mut updates: BTreeMap<String, Value> = best.context_updates.clone();
        updates.insert(
            "parallel.fan_in.best_id".to_string(),
            Value::String(best.id.clone()),
        );
        Ok(Outcome {
            context_updates: updates,
            ..Outcome::success()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::services_fixture;
    use crate::graph::{Graph, RawEdge, RawGraph, RawNode};
    use crate::outcome::StageStatus;
    use serde_json::json;

    fn graph_with_fanin() -> Graph {
        Graph::compile(
            RawGraph::new("g")
                .with_node(RawNode::new("s").with_shape("Mdiamond"))
                .with_node(RawNode::new("f").with_shape("tripleoctagon"))
                .with_node(RawNode::new("e").with_shape("Msquare"))
                .with_edge(RawEdge::new("s", "f"))
                .with_edge(RawEdge::new("f", "e")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn adopts_best_branch_updates() {
        let graph = graph_with_fanin();
        let fixture = services_fixture(&graph);
        let services = fixture.services();

        let mut context = Context::new();
        context.set(
            "parallel.results",
            json!([
                {"id": "slow", "status": "partial_success", "weight": 9,
                 "context_updates": {"picked": "slow"}},
                {"id": "good", "status": "success", "weight": 1,
                 "context_updates": {"picked": "good"}}
            ]),
        );

        let outcome = FanInHandler
            .execute(graph.node("f").unwrap(), &context, &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.context_updates["picked"], json!("good"));
        assert_eq!(
            outcome.context_updates["parallel.fan_in.best_id"],
            json!("good")
        );
    }

    #[tokio::test]
    async fn missing_results_fail() {
        let graph = graph_with_fanin();
        let fixture = services_fixture(&graph);
        let services = fixture.services();

        let outcome = FanInHandler
            .execute(graph.node("f").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
