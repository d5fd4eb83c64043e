//! Checkpoints: serialized engine state for resume.
//!
//! A checkpoint captures the run after every completed stage. The graph
//! fingerprint (name, goal, node count) guards against resuming against
//! a different pipeline than the one that produced the file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, GraphFingerprint};
use crate::outcome::StageStatus;

/// Bumped when the on-disk layout changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serialized engine state after a completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub fingerprint: GraphFingerprint,
    /// Id of the most recently completed node.
    pub last_node: String,
    /// Completed node ids, in completion order.
    pub completed: Vec<String>,
    /// Final status per completed node.
    pub outcomes: BTreeMap<String, StageStatus>,
    /// Full context snapshot.
    pub context: BTreeMap<String, Value>,
    pub started_at: String,
    pub saved_at: String,
}

impl Checkpoint {
    pub fn capture(
        graph: &Graph,
        last_node: &str,
        completed: &[String],
        outcomes: &BTreeMap<String, StageStatus>,
        context: &Context,
        started_at: &str,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            fingerprint: graph.fingerprint(),
            last_node: last_node.to_string(),
            completed: completed.to_vec(),
            outcomes: outcomes.clone(),
            context: context.snapshot(),
            started_at: started_at.to_string(),
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Verify this checkpoint belongs to the supplied graph.
    pub fn verify(&self, graph: &Graph) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(PipelineError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                self.version
            )));
        }
        let fingerprint = graph.fingerprint();
        if self.fingerprint != fingerprint {
            return Err(PipelineError::Checkpoint(format!(
                "checkpoint fingerprint mismatch: checkpoint is for '{}' ({} nodes), graph is '{}' ({} nodes)",
                self.fingerprint.name,
                self.fingerprint.node_count,
                fingerprint.name,
                fingerprint.node_count
            )));
        }
        Ok(())
    }

    pub fn restore_context(&self) -> Context {
        Context::from_snapshot(self.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::linear_raw;
    use serde_json::json;

    #[test]
    fn capture_and_verify_round_trip() {
        let graph = Graph::compile(linear_raw()).unwrap();
        let mut context = Context::new();
        context.set("goal", json!("a REST API"));

        let outcomes =
            BTreeMap::from([("start".to_string(), StageStatus::Success)]);
        let checkpoint = Checkpoint::capture(
            &graph,
            "start",
            &["start".to_string()],
            &outcomes,
            &context,
            "2026-01-01T00:00:00Z",
        );

        checkpoint.verify(&graph).unwrap();

        let text = serde_json::to_string_pretty(&checkpoint).unwrap();
        let reloaded: Checkpoint = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded, checkpoint);
        assert_eq!(reloaded.restore_context(), context);
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let graph = Graph::compile(linear_raw()).unwrap();
        let other = Graph::compile(
            linear_raw()
                .with_node(
                    crate::graph::RawNode::new("extra")
                        .with_shape("box")
                        .with_attr("prompt", "p"),
                )
                .with_edge(crate::graph::RawEdge::new("start", "extra"))
                .with_edge(crate::graph::RawEdge::new("extra", "exit")),
        )
        .unwrap();

        let checkpoint = Checkpoint::capture(
            &graph,
            "start",
            &[],
            &BTreeMap::new(),
            &Context::new(),
            "t",
        );
        assert!(checkpoint.verify(&other).is_err());
        assert!(checkpoint.verify(&graph).is_ok());
    }
}
