//! Parallel fan-out: sibling branches with best-outcome selection.
//!
//! The fan-out node's outgoing edges, minus the continuation edge
//! (explicitly marked `continue=true`, or the highest-weight edge), are
//! branch entries. Each branch gets a deep copy of the context and runs
//! its downstream slice up to (not including) the first fan-in node.
//!
//! Branches run serially in source order by default (the reproducible
//! baseline) or concurrently under [`ParallelMode::Concurrent`]; either
//! way, results are reduced in source order so tie-breaks stay
//! deterministic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::edge_select::select_edge;
use crate::error::Result;
use crate::graph::{Edge, Node, NodeKind};
use crate::handlers::{EngineServices, Handler};
use crate::outcome::{Outcome, StageStatus};

/// How sibling branches are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelMode {
    /// Deterministic source-order execution; the default.
    #[default]
    Serial,
    /// Branches run concurrently; results still reduce in source order.
    Concurrent,
}

/// One branch's result, stored under `parallel.results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Entry node id of the branch.
    pub id: String,
    pub status: StageStatus,
    /// Weight of the branch's entry edge.
    pub weight: i64,
    /// Context updates accumulated along the branch.
    #[serde(default)]
    pub context_updates: BTreeMap<String, Value>,
}

impl BranchRecord {
    /// The best branch: status rank, then weight, then source order.
    pub fn best(records: &[BranchRecord]) -> Option<&BranchRecord> {
        let mut best: Option<&BranchRecord> = None;
        for record in records {
            let better = match best {
                None => true,
                Some(current) => {
                    (record.status.rank(), record.weight)
                        > (current.status.rank(), current.weight)
                }
            };
            if better {
                best = Some(record);
            }
        }
        best
    }
}

/// Safety bound on nodes executed inside one branch slice.
const MAX_SLICE_STEPS: usize = 128;

pub struct ParallelHandler;

#[async_trait]
impl Handler for ParallelHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let outgoing = services.graph.outgoing(&node.id);
        let continuation = services.graph.continuation_edge(&node.id);

        let branch_edges: Vec<&Edge> = outgoing
            .into_iter()
            .filter(|edge| {
                continuation.map_or(true, |cont| !std::ptr::eq(*edge, cont))
            })
            .collect();

        if branch_edges.is_empty() {
            return Ok(Outcome::fail(format!(
                "parallel node '{}' has no branch edges",
                node.id
            )));
        }

        let records = match services.parallel_mode {
            ParallelMode::Serial => {
                let mut records = Vec::with_capacity(branch_edges.len());
                for edge in &branch_edges {
                    records.push(run_branch(services, edge, context).await);
                }
                records
            }
            ParallelMode::Concurrent => {
                // join_all preserves input order, which is source order.
                futures::future::join_all(
                    branch_edges
                        .iter()
                        .map(|edge| run_branch(services, edge, context)),
                )
                .await
            }
        };

        let best = BranchRecord::best(&records)
            .expect("at least one branch record exists");

        let mut outcome = Outcome::success()
            .with_update(
                "parallel.fan_in.best_id",
                Value::String(best.id.clone()),
            )
            .with_update("parallel.results", serde_json::to_value(&records)?);
        outcome.notes = Some(format!(
            "ran {} branches; best '{}' ({})",
            records.len(),
            best.id,
            best.status.as_str()
        ));
        Ok(outcome)
    }
}

/// Run one branch slice on a deep copy of the context.
///
/// Executes nodes from the branch entry forward, following single-edge
/// selection, and stops at the first fan-in or exit node, a failure, or
/// a dead end.
async fn run_branch(
    services: &EngineServices<'_>,
    entry_edge: &Edge,
    parent_context: &Context,
) -> BranchRecord {
    let mut context = parent_context.deep_copy();
    let mut updates: BTreeMap<String, Value> = BTreeMap::new();
    let mut status = StageStatus::Success;
    let mut current = entry_edge.to.clone();

    for _ in 0..MAX_SLICE_STEPS {
        let Some(node) = services.graph.node(&current) else {
            status = StageStatus::Fail;
            break;
        };
        if matches!(node.kind, NodeKind::FanIn | NodeKind::Exit) {
            break;
        }

        let Some(handler) = services.registry.resolve(node.kind) else {
            status = StageStatus::Fail;
            break;
        };
        let outcome = match handler.execute(node, &context, services).await {
            Ok(outcome) => outcome,
            Err(error) => Outcome::fail(error.to_string()),
        };

        status = match outcome.status {
            // Branch slices have no retry queue; a retry is a failure.
            StageStatus::Retry => StageStatus::Fail,
            other => other,
        };

        if matches!(status, StageStatus::Success | StageStatus::PartialSuccess) {
            context.apply_updates(&outcome.context_updates);
            for (key, value) in &outcome.context_updates {
                updates.insert(key.clone(), value.clone());
            }
            context.set("outcome", Value::String(status.as_str().to_string()));
            context.set("last_stage", Value::String(node.id.clone()));
        } else {
            break;
        }

        match select_edge(services.graph, &node.id, &outcome, &context) {
            Some(edge) => current = edge.to.clone(),
            None => break,
        }
    }

    BranchRecord {
        id: entry_edge.to.clone(),
        status,
        weight: entry_edge.weight(),
        context_updates: updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::services_fixture;
    use crate::graph::{Graph, RawEdge, RawGraph, RawNode};
    use crate::handlers::codergen::{CodergenOutput, ScriptedBackend};
    use std::sync::Arc;

    /// fan-out with two branches converging on a fan-in.
    fn fan_graph() -> Graph {
        Graph::compile(
            RawGraph::new("g")
                .with_node(RawNode::new("s").with_shape("Mdiamond"))
                .with_node(RawNode::new("p").with_shape("component"))
                .with_node(RawNode::new("b1").with_shape("box").with_attr("prompt", "one"))
                .with_node(RawNode::new("b2").with_shape("box").with_attr("prompt", "two"))
                .with_node(RawNode::new("f").with_shape("tripleoctagon"))
                .with_node(RawNode::new("e").with_shape("Msquare"))
                .with_edge(RawEdge::new("s", "p"))
                .with_edge(RawEdge::new("p", "b1").with_attr("weight", 2i64))
                .with_edge(RawEdge::new("p", "b2"))
                .with_edge(RawEdge::new("p", "f").with_attr("continue", true))
                .with_edge(RawEdge::new("b1", "f"))
                .with_edge(RawEdge::new("b2", "f"))
                .with_edge(RawEdge::new("f", "e")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn branches_run_and_best_is_ranked() {
        let graph = fan_graph();
        let backend = Arc::new(ScriptedBackend::new(vec![
            CodergenOutput::Outcome(Outcome::fail("branch one broke")),
            CodergenOutput::Text("branch two output".into()),
        ]));
        let fixture = services_fixture(&graph).with_backend(backend.clone());
        let services = fixture.services();

        let outcome = ParallelHandler
            .execute(graph.node("p").unwrap(), &Context::new(), &services)
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        // b1 failed, so b2 wins despite b1's higher weight.
        assert_eq!(
            outcome.context_updates["parallel.fan_in.best_id"],
            serde_json::json!("b2")
        );
        let records: Vec<BranchRecord> =
            serde_json::from_value(outcome.context_updates["parallel.results"].clone()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "b1");
        assert_eq!(records[0].status, StageStatus::Fail);
        assert_eq!(records[1].status, StageStatus::Success);

        // Source-order execution: b1's backend call happened first.
        assert_eq!(backend.invocations(), vec!["b1".to_string(), "b2".to_string()]);
    }

    #[tokio::test]
    async fn weight_breaks_status_ties() {
        let graph = fan_graph();
        let fixture = services_fixture(&graph); // simulation: both succeed
        let services = fixture.services();

        let outcome = ParallelHandler
            .execute(graph.node("p").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(
            outcome.context_updates["parallel.fan_in.best_id"],
            serde_json::json!("b1")
        );
    }

    #[tokio::test]
    async fn concurrent_mode_reduces_in_source_order() {
        let graph = fan_graph();
        let fixture = services_fixture(&graph).with_parallel_mode(ParallelMode::Concurrent);
        let services = fixture.services();

        let outcome = ParallelHandler
            .execute(graph.node("p").unwrap(), &Context::new(), &services)
            .await
            .unwrap();
        let records: Vec<BranchRecord> =
            serde_json::from_value(outcome.context_updates["parallel.results"].clone()).unwrap();
        assert_eq!(records[0].id, "b1");
        assert_eq!(records[1].id, "b2");
    }

    #[tokio::test]
    async fn branch_contexts_are_isolated() {
        let graph = fan_graph();
        let fixture = services_fixture(&graph);
        let services = fixture.services();

        let mut context = Context::new();
        context.set("shared", serde_json::json!("before"));
        ParallelHandler
            .execute(graph.node("p").unwrap(), &context, &services)
            .await
            .unwrap();
        // The parent context was only read, never written.
        assert_eq!(context.get_string("shared", ""), "before");
    }
}
