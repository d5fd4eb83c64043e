//! Graph rendering for inspection: DOT and Mermaid.

use std::fmt::Write as _;

use crate::graph::Graph;

/// Output format for [`visualize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Mermaid,
}

/// Render a compiled graph.
pub fn visualize(graph: &Graph, format: VisualizationFormat) -> String {
    match format {
        VisualizationFormat::Dot => render_dot(graph),
        VisualizationFormat::Mermaid => render_mermaid(graph),
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "\\\"")
}

fn render_dot(graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(&graph.name));
    if !graph.goal.is_empty() {
        let _ = writeln!(out, "    goal=\"{}\";", escape(&graph.goal));
    }
    for node in graph.nodes() {
        let _ = writeln!(
            out,
            "    \"{}\" [shape={}, label=\"{}\"];",
            escape(&node.id),
            node.shape,
            escape(node.label())
        );
    }
    for edge in graph.edges() {
        let mut attrs: Vec<String> = Vec::new();
        if let Some(label) = edge.label() {
            attrs.push(format!("label=\"{}\"", escape(label)));
        }
        if let Some(condition) = edge.condition() {
            attrs.push(format!("condition=\"{}\"", escape(condition)));
        }
        let rendered = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        let _ = writeln!(
            out,
            "    \"{}\" -> \"{}\"{};",
            escape(&edge.from),
            escape(&edge.to),
            rendered
        );
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(graph: &Graph) -> String {
    let mut out = String::from("flowchart TD\n");
    for node in graph.nodes() {
        let label = node.label().replace('"', "'");
        let _ = writeln!(out, "    {}[\"{}\"]", node.id, label);
    }
    for edge in graph.edges() {
        match edge.label() {
            Some(label) => {
                let label = label.replace('"', "'");
                let _ = writeln!(out, "    {} -->|{}| {}", edge.from, label, edge.to);
            }
            None => {
                let _ = writeln!(out, "    {} --> {}", edge.from, edge.to);
            }
        }
    }
    out
}
