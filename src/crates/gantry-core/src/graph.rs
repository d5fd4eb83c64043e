//! Graph data structures and compilation.
//!
//! The pipeline source language is DOT-like; its lexer/parser is an
//! external collaborator that produces a [`RawGraph`] through the
//! [`GraphSource`] trait. [`Graph::compile`] turns a raw graph into the
//! immutable executable form: it derives each node's kind from its shape,
//! resolves attribute inheritance (graph defaults → stylesheet-matched →
//! node-local), derives class tokens, expands graph-level `$name`
//! bindings, and recursively compiles nested sub-pipelines.
//!
//! A compiled [`Graph`] is never mutated; run-time `$name` substitution
//! always produces new strings.
//!
//! # Shape → kind mapping
//!
//! | Shape | Kind |
//! |---|---|
//! | `Mdiamond` | start (passthrough) |
//! | `Msquare` | exit (passthrough) |
//! | `box` | codergen |
//! | `diamond` | conditional |
//! | `component` | parallel fan-out |
//! | `tripleoctagon` | fan-in |
//! | `hexagon` | wait-human |
//! | `folder` | sub-pipeline |
//!
//! Nodes without a shape default to codergen.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::stylesheet::ModelStylesheet;
use crate::validate::{validate, ValidationWarning};
use crate::vars::expand_with;

/// Node identifier.
pub type NodeId = String;

/// An attribute value: string, integer, or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    /// Parse a raw token: `true`/`false` → bool, integer literal → int,
    /// anything else (quotes stripped) → string.
    pub fn parse(token: &str) -> AttrValue {
        let token = token.trim();
        let unquoted = token
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'));
        if let Some(inner) = unquoted {
            return AttrValue::Str(inner.to_string());
        }
        if let Ok(flag) = token.parse::<bool>() {
            return AttrValue::Bool(flag);
        }
        if let Ok(number) = token.parse::<i64>() {
            return AttrValue::Int(number);
        }
        AttrValue::Str(token.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(number) => Some(*number),
            AttrValue::Str(text) => text.parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(flag) => Some(*flag),
            AttrValue::Str(text) => text.parse().ok(),
            AttrValue::Int(_) => None,
        }
    }

    /// Render to the string form used for substitution and logs.
    pub fn to_string_value(&self) -> String {
        match self {
            AttrValue::Str(text) => text.clone(),
            AttrValue::Int(number) => number.to_string(),
            AttrValue::Bool(flag) => flag.to_string(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(text: &str) -> Self {
        AttrValue::Str(text.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(text: String) -> Self {
        AttrValue::Str(text)
    }
}

impl From<i64> for AttrValue {
    fn from(number: i64) -> Self {
        AttrValue::Int(number)
    }
}

impl From<bool> for AttrValue {
    fn from(flag: bool) -> Self {
        AttrValue::Bool(flag)
    }
}

/// Handler kind, derived from a node's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Exit,
    Codergen,
    Conditional,
    Parallel,
    FanIn,
    WaitHuman,
    SubPipeline,
}

impl NodeKind {
    pub fn from_shape(shape: &str) -> NodeKind {
        match shape {
            "Mdiamond" => NodeKind::Start,
            "Msquare" => NodeKind::Exit,
            "diamond" => NodeKind::Conditional,
            "component" => NodeKind::Parallel,
            "tripleoctagon" => NodeKind::FanIn,
            "hexagon" => NodeKind::WaitHuman,
            "folder" => NodeKind::SubPipeline,
            // `box` and anything unrecognized is LLM-backed work.
            _ => NodeKind::Codergen,
        }
    }
}

/// A node as produced by the external parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    /// Label of the enclosing subgraph, if any; compiled into a class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph_label: Option<String>,
    /// Nested pipeline for `folder` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<Box<RawGraph>>,
}

impl RawNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_shape(self, shape: &str) -> Self {
        self.with_attr("shape", shape)
    }
}

/// An edge as produced by the external parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl RawEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

/// The parser-facing graph representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    pub name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub edges: Vec<RawEdge>,
}

impl RawGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_node(mut self, node: RawNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: RawEdge) -> Self {
        self.edges.push(edge);
        self
    }
}

/// The external DOT-source parser contract.
pub trait GraphSource: Send + Sync {
    fn parse(&self, text: &str) -> Result<RawGraph>;
}

/// An immutable compiled node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub shape: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub classes: Vec<String>,
    /// Compiled nested pipeline for sub-pipeline nodes.
    pub subgraph: Option<Arc<Graph>>,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    pub fn attr_i64(&self, name: &str, default: i64) -> i64 {
        self.attr(name).and_then(AttrValue::as_i64).unwrap_or(default)
    }

    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        self.attr(name).and_then(AttrValue::as_bool).unwrap_or(default)
    }

    /// The display label; falls back to the node id.
    pub fn label(&self) -> &str {
        self.attr_str("label").unwrap_or(&self.id)
    }

    pub fn prompt(&self) -> Option<&str> {
        self.attr_str("prompt")
    }

    pub fn max_retries(&self) -> u32 {
        self.attr_i64("max_retries", 2).max(0) as u32
    }

    pub fn allow_partial(&self) -> bool {
        self.attr_bool("allow_partial", false)
    }

    pub fn goal_gate(&self) -> bool {
        self.attr_bool("goal_gate", false)
    }

    pub fn reasoning_effort(&self) -> &str {
        self.attr_str("reasoning_effort").unwrap_or("high")
    }

    pub fn timeout_ms(&self) -> Option<i64> {
        self.attr("timeout_ms").and_then(AttrValue::as_i64)
    }
}

/// An immutable compiled edge.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Edge {
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(AttrValue::as_str)
    }

    pub fn label(&self) -> Option<&str> {
        self.attr_str("label")
    }

    pub fn condition(&self) -> Option<&str> {
        self.attr_str("condition")
    }

    pub fn weight(&self) -> i64 {
        self.attrs.get("weight").and_then(AttrValue::as_i64).unwrap_or(1)
    }

    pub fn priority(&self) -> i64 {
        self.attrs
            .get("priority")
            .and_then(AttrValue::as_i64)
            .unwrap_or(0)
    }

    /// The bracketed key of a `[K] rest` label.
    pub fn label_key(&self) -> Option<&str> {
        let label = self.label()?;
        let rest = label.strip_prefix('[')?;
        let close = rest.find(']')?;
        Some(rest[..close].trim())
    }

    /// Whether this edge's label matches a preferred label: strict string
    /// compare, or for `[K] rest` labels a match on `K` as well.
    pub fn matches_label(&self, preferred: &str) -> bool {
        match self.label() {
            Some(label) if label == preferred => true,
            Some(_) => self.label_key() == Some(preferred),
            None => false,
        }
    }

    /// Explicitly marked as the fan-out continuation edge.
    pub fn is_marked_continuation(&self) -> bool {
        self.attrs
            .get("continue")
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }
}

/// Identity summary used to match checkpoints to graphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFingerprint {
    pub name: String,
    pub goal: String,
    pub node_count: usize,
}

/// An immutable compiled pipeline graph.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub goal: String,
    nodes: BTreeMap<NodeId, Node>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    pub start_id: NodeId,
    pub exit_ids: Vec<NodeId>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub stylesheet: ModelStylesheet,
    /// Non-fatal findings from validation.
    pub warnings: Vec<ValidationWarning>,
}

impl Graph {
    /// Compile a raw graph into the executable form.
    pub fn compile(raw: RawGraph) -> Result<Graph> {
        let stylesheet = match raw.attrs.get("model_stylesheet").and_then(AttrValue::as_str) {
            Some(text) => ModelStylesheet::parse(text)?,
            None => ModelStylesheet::empty(),
        };

        // Graph-level string attributes may reference each other, e.g.
        // goal = "Ship $project". Bindings resolve at compile time.
        let graph_attrs: BTreeMap<String, AttrValue> = raw
            .attrs
            .iter()
            .map(|(name, value)| {
                let expanded = match value {
                    AttrValue::Str(text) => AttrValue::Str(expand_with(text, |binding| {
                        raw.attrs
                            .get(binding)
                            .filter(|_| binding != name)
                            .map(AttrValue::to_string_value)
                    })),
                    other => other.clone(),
                };
                (name.clone(), expanded)
            })
            .collect();

        let goal = graph_attrs
            .get("goal")
            .map(AttrValue::to_string_value)
            .unwrap_or_default();

        // Graph defaults that seed node attribute inheritance.
        let mut defaults: BTreeMap<String, AttrValue> = BTreeMap::new();
        if let Some(retries) = graph_attrs.get("default_max_retry") {
            defaults.insert("max_retries".to_string(), retries.clone());
        }

        let mut nodes = BTreeMap::new();
        let mut node_order = Vec::with_capacity(raw.nodes.len());
        let mut start_id = None;
        let mut exit_ids = Vec::new();

        for raw_node in raw.nodes {
            let shape = raw_node
                .attrs
                .get("shape")
                .and_then(AttrValue::as_str)
                .unwrap_or("box")
                .to_string();
            let kind = NodeKind::from_shape(&shape);

            let mut classes: Vec<String> = raw_node
                .attrs
                .get("class")
                .and_then(AttrValue::as_str)
                .map(|list| list.split_whitespace().map(String::from).collect())
                .unwrap_or_default();
            if let Some(label) = &raw_node.subgraph_label {
                classes.push(slugify(label));
            }

            // Inheritance: defaults, then stylesheet, then node-local.
            let mut attrs = defaults.clone();
            for (name, value) in stylesheet.resolve(&shape, &raw_node.id, &classes) {
                attrs.insert(name, value);
            }
            for (name, value) in &raw_node.attrs {
                attrs.insert(name.clone(), value.clone());
            }

            let subgraph = match raw_node.subgraph {
                Some(nested) => Some(Arc::new(Graph::compile(*nested)?)),
                None => None,
            };

            match kind {
                NodeKind::Start => {
                    if start_id.replace(raw_node.id.clone()).is_some() {
                        return Err(PipelineError::Validation(
                            "graph has more than one start node".to_string(),
                        ));
                    }
                }
                NodeKind::Exit => exit_ids.push(raw_node.id.clone()),
                _ => {}
            }

            if nodes.contains_key(&raw_node.id) {
                return Err(PipelineError::Validation(format!(
                    "duplicate node id '{}'",
                    raw_node.id
                )));
            }
            node_order.push(raw_node.id.clone());
            nodes.insert(
                raw_node.id.clone(),
                Node {
                    id: raw_node.id,
                    kind,
                    shape,
                    attrs,
                    classes,
                    subgraph,
                },
            );
        }

        let start_id = start_id.ok_or_else(|| {
            PipelineError::Validation("graph has no start node (shape=Mdiamond)".to_string())
        })?;
        if exit_ids.is_empty() {
            return Err(PipelineError::Validation(
                "graph has no exit node (shape=Msquare)".to_string(),
            ));
        }

        let edges = raw
            .edges
            .into_iter()
            .map(|raw_edge| Edge {
                from: raw_edge.from,
                to: raw_edge.to,
                attrs: raw_edge.attrs,
            })
            .collect();

        let mut graph = Graph {
            name: raw.name,
            goal,
            nodes,
            node_order,
            edges,
            start_id,
            exit_ids,
            attrs: graph_attrs,
            stylesheet,
            warnings: Vec::new(),
        };
        graph.warnings = validate(&graph)?;
        Ok(graph)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn require_node(&self, id: &str) -> Result<&Node> {
        self.node(id).ok_or_else(|| PipelineError::NodeNotFound {
            node: id.to_string(),
        })
    }

    /// Nodes in source-declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges in source-declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges of a node, in source-declaration order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.from == id).collect()
    }

    /// Inbound edges of a node, in source-declaration order.
    pub fn inbound(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.to == id).collect()
    }

    pub fn start_node(&self) -> &Node {
        self.nodes
            .get(&self.start_id)
            .expect("validated start node")
    }

    /// The continuation edge of a parallel fan-out node: the one marked
    /// `continue=true`, else the highest-weight edge (source order breaks
    /// ties).
    pub fn continuation_edge(&self, id: &str) -> Option<&Edge> {
        let outgoing = self.outgoing(id);
        if let Some(marked) = outgoing.iter().find(|edge| edge.is_marked_continuation()) {
            return Some(marked);
        }
        // Strictly-greater comparison keeps the earliest edge on ties.
        let mut best: Option<&Edge> = None;
        for edge in outgoing {
            if best.map_or(true, |current| edge.weight() > current.weight()) {
                best = Some(edge);
            }
        }
        best
    }

    /// Graph-level attribute lookup.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(AttrValue::as_str)
    }

    /// The node a failed goal gate re-enqueues.
    pub fn retry_target(&self) -> Option<&str> {
        self.attr_str("retry_target")
    }

    pub fn fingerprint(&self) -> GraphFingerprint {
        GraphFingerprint {
            name: self.name.clone(),
            goal: self.goal.clone(),
            node_count: self.nodes.len(),
        }
    }
}

/// Lowercase, non-alphanumerics to `-`, collapse runs.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut last_dash = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
