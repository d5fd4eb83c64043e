//! Structural graph validation.
//!
//! Runs at the end of compilation. Fatal findings (missing edges,
//! unreachable exits, dangling edge endpoints, codergen nodes without a
//! prompt, unmarked cycles) fail the compile; soft findings (a condition
//! referencing a context key no stage is known to produce) come back as
//! warnings.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::edge_select::parse_condition;
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, NodeKind};

/// A non-fatal validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Validate a compiled graph; fatal problems error, soft ones return as
/// warnings.
pub fn validate(graph: &Graph) -> Result<Vec<ValidationWarning>> {
    let mut warnings = Vec::new();

    // Edge endpoints must exist.
    for edge in graph.edges() {
        for endpoint in [&edge.from, &edge.to] {
            if graph.node(endpoint).is_none() {
                return Err(PipelineError::Validation(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.from, edge.to
                )));
            }
        }
    }

    // Degree requirements: every non-start node needs an inbound edge,
    // every non-exit node an outbound edge.
    for node in graph.nodes() {
        if node.kind != NodeKind::Start && graph.inbound(&node.id).is_empty() {
            return Err(PipelineError::Validation(format!(
                "node '{}' has no inbound edge",
                node.id
            )));
        }
        if node.kind != NodeKind::Exit && graph.outgoing(&node.id).is_empty() {
            return Err(PipelineError::Validation(format!(
                "node '{}' has no outbound edge",
                node.id
            )));
        }
    }

    // Connectivity from the start node.
    let reachable = reachable_from(graph, &graph.start_id);
    for node in graph.nodes() {
        if !reachable.contains(node.id.as_str()) {
            return Err(PipelineError::Validation(format!(
                "node '{}' is not reachable from '{}'",
                node.id, graph.start_id
            )));
        }
    }
    if !graph
        .exit_ids
        .iter()
        .any(|exit| reachable.contains(exit.as_str()))
    {
        return Err(PipelineError::Validation(
            "no exit node is reachable from the start node".to_string(),
        ));
    }

    // Shape-attribute compatibility: codergen work needs a prompt (the
    // label doubles as one).
    for node in graph.nodes() {
        if node.kind == NodeKind::Codergen
            && node.prompt().map_or(true, str::is_empty)
            && node.attr_str("label").map_or(true, str::is_empty)
        {
            return Err(PipelineError::Validation(format!(
                "codergen node '{}' has neither prompt nor label",
                node.id
            )));
        }
        if node.kind == NodeKind::SubPipeline && node.subgraph.is_none() {
            return Err(PipelineError::Validation(format!(
                "sub-pipeline node '{}' has no nested graph",
                node.id
            )));
        }
    }

    // Cycles must be explicitly marked as goal-gate back-edges: either
    // `loop_back=true` on the edge, or an edge into the graph's declared
    // retry target.
    check_cycles(graph)?;

    // Conditions referencing context keys nothing is known to set are
    // soft findings only.
    let known_keys = known_context_keys(graph);
    for edge in graph.edges() {
        if let Some(condition_text) = edge.condition() {
            match parse_condition(condition_text) {
                Err(error) => {
                    return Err(PipelineError::Validation(format!(
                        "edge {} -> {}: {error}",
                        edge.from, edge.to
                    )));
                }
                Ok(condition) => {
                    if let Some(key) = condition.context_key() {
                        if !known_keys.contains(key) {
                            warnings.push(ValidationWarning::new(format!(
                                "edge {} -> {} condition references unknown context key '{key}'",
                                edge.from, edge.to
                            )));
                        }
                    }
                }
            }
        }
    }

    Ok(warnings)
}

fn reachable_from<'g>(graph: &'g Graph, start: &str) -> HashSet<&'g str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    if let Some(node) = graph.node(start) {
        seen.insert(node.id.as_str());
        stack.push(node.id.as_str());
    }
    while let Some(current) = stack.pop() {
        for edge in graph.outgoing(current) {
            if let Some(node) = graph.node(&edge.to) {
                if seen.insert(node.id.as_str()) {
                    stack.push(node.id.as_str());
                }
            }
        }
    }
    seen
}

fn check_cycles(graph: &Graph) -> Result<()> {
    // Iterative DFS with colors; back-edges that are unmarked are fatal.
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let retry_target = graph.retry_target().map(str::to_string);
    let mut colors: HashMap<String, Color> = graph
        .nodes()
        .map(|node| (node.id.clone(), Color::White))
        .collect();

    fn visit(
        graph: &Graph,
        node_id: &str,
        colors: &mut HashMap<String, Color>,
        retry_target: &Option<String>,
    ) -> Result<()> {
        colors.insert(node_id.to_string(), Color::Gray);
        for edge in graph.outgoing(node_id) {
            let marked = edge
                .attrs
                .get("loop_back")
                .and_then(crate::graph::AttrValue::as_bool)
                .unwrap_or(false)
                || retry_target.as_deref() == Some(edge.to.as_str());
            if marked {
                continue;
            }
            match colors.get(edge.to.as_str()).copied().unwrap_or(Color::White) {
                Color::Gray => {
                    return Err(PipelineError::Validation(format!(
                        "cycle through edge {} -> {} is not marked as a goal-gate back-edge",
                        edge.from, edge.to
                    )));
                }
                Color::White => visit(graph, &edge.to, colors, retry_target)?,
                Color::Black => {}
            }
        }
        colors.insert(node_id.to_string(), Color::Black);
        Ok(())
    }

    let ids: Vec<String> = graph.nodes().map(|node| node.id.clone()).collect();
    for id in ids {
        if colors.get(&id) == Some(&Color::White) {
            visit(graph, &id, &mut colors, &retry_target)?;
        }
    }
    Ok(())
}

/// Context keys some part of the system is known to produce: engine
/// bookkeeping, graph attributes, and per-stage bookkeeping keys.
fn known_context_keys(graph: &Graph) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = [
        "outcome",
        "last_stage",
        "last_output",
        "last_output_full",
        "goal",
        "parallel.results",
        "parallel.fan_in.best_id",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    for (name, _) in &graph.attrs {
        keys.insert(name.clone());
    }
    for node in graph.nodes() {
        // Codergen stages publish under their own id as well.
        keys.insert(node.id.clone());
        keys.insert(format!("{}.output", node.id));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RawEdge, RawGraph, RawNode};

    fn skeleton() -> RawGraph {
        RawGraph::new("g")
            .with_node(RawNode::new("s").with_shape("Mdiamond"))
            .with_node(RawNode::new("e").with_shape("Msquare"))
    }

    #[test]
    fn dangling_edge_endpoint_is_fatal() {
        let raw = skeleton()
            .with_edge(RawEdge::new("s", "ghost"))
            .with_edge(RawEdge::new("s", "e"));
        assert!(Graph::compile(raw).is_err());
    }

    #[test]
    fn isolated_node_is_fatal() {
        let raw = skeleton()
            .with_node(RawNode::new("island").with_shape("box").with_attr("prompt", "p"))
            .with_edge(RawEdge::new("s", "e"));
        assert!(Graph::compile(raw).is_err());
    }

    #[test]
    fn codergen_without_prompt_or_label_is_fatal() {
        let raw = skeleton()
            .with_node(RawNode::new("w").with_shape("box"))
            .with_edge(RawEdge::new("s", "w"))
            .with_edge(RawEdge::new("w", "e"));
        assert!(Graph::compile(raw).is_err());

        // A label is an acceptable prompt substitute.
        let raw = skeleton()
            .with_node(RawNode::new("w").with_shape("box").with_attr("label", "do it"))
            .with_edge(RawEdge::new("s", "w"))
            .with_edge(RawEdge::new("w", "e"));
        assert!(Graph::compile(raw).is_ok());
    }

    #[test]
    fn unmarked_cycle_is_fatal_marked_is_allowed() {
        let cyclic = |marked: bool| {
            let mut edge_back = RawEdge::new("b", "a");
            if marked {
                edge_back = edge_back.with_attr("loop_back", true);
            }
            skeleton()
                .with_node(RawNode::new("a").with_shape("box").with_attr("prompt", "p"))
                .with_node(RawNode::new("b").with_shape("box").with_attr("prompt", "p"))
                .with_edge(RawEdge::new("s", "a"))
                .with_edge(RawEdge::new("a", "b"))
                .with_edge(edge_back)
                .with_edge(RawEdge::new("b", "e"))
        };
        assert!(Graph::compile(cyclic(false)).is_err());
        assert!(Graph::compile(cyclic(true)).is_ok());
    }

    #[test]
    fn retry_target_back_edge_is_allowed() {
        let raw = skeleton()
            .with_attr("retry_target", "a")
            .with_node(RawNode::new("a").with_shape("box").with_attr("prompt", "p"))
            .with_node(
                RawNode::new("gate")
                    .with_shape("box")
                    .with_attr("prompt", "p")
                    .with_attr("goal_gate", true),
            )
            .with_edge(RawEdge::new("s", "a"))
            .with_edge(RawEdge::new("a", "gate"))
            .with_edge(RawEdge::new("gate", "a"))
            .with_edge(RawEdge::new("gate", "e"));
        assert!(Graph::compile(raw).is_ok());
    }

    #[test]
    fn unknown_condition_key_is_a_warning_only() {
        let raw = skeleton()
            .with_node(RawNode::new("w").with_shape("box").with_attr("prompt", "p"))
            .with_edge(RawEdge::new("s", "w"))
            .with_edge(RawEdge::new("w", "e").with_attr("condition", "context.mystery=1"));
        let graph = Graph::compile(raw).unwrap();
        assert_eq!(graph.warnings.len(), 1);
        assert!(graph.warnings[0].message.contains("mystery"));
    }

    #[test]
    fn malformed_condition_is_fatal() {
        let raw = skeleton()
            .with_node(RawNode::new("w").with_shape("box").with_attr("prompt", "p"))
            .with_edge(RawEdge::new("s", "w"))
            .with_edge(RawEdge::new("w", "e").with_attr("condition", "outcome ~~ x"));
        assert!(Graph::compile(raw).is_err());
    }
}
