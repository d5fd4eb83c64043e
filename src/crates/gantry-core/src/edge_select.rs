//! Edge selection: picks the next node(s) after a completed stage.
//!
//! Selection procedure, in order:
//!
//! 1. Evaluate each outgoing edge's condition against the post-outcome
//!    context (the engine writes `outcome` before selecting).
//! 2. If the outcome carries a preferred label, prefer edges whose label
//!    matches it (strict compare, or the bracketed key of `[K] rest`).
//! 3. Among remaining candidates: highest priority, then highest weight,
//!    then source order.
//!
//! No surviving candidate means the outcome is fatal; the engine fails
//! the run with a structured reason.

use regex::Regex;

use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::{Edge, Graph};
use crate::outcome::Outcome;

/// A parsed edge condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Empty condition: always true.
    Always,
    /// `outcome=<value>` against the engine's `outcome` context key.
    OutcomeEq(String),
    /// `context.<key>=<literal>`
    ContextEq { key: String, literal: String },
    /// `context.<key>!=<literal>`
    ContextNe { key: String, literal: String },
    /// `context.<key>~<regex>`
    ContextMatch { key: String, pattern: Regex },
}

impl Condition {
    /// The context key this condition reads, for validation.
    pub fn context_key(&self) -> Option<&str> {
        match self {
            Condition::Always | Condition::OutcomeEq(_) => None,
            Condition::ContextEq { key, .. }
            | Condition::ContextNe { key, .. }
            | Condition::ContextMatch { key, .. } => Some(key),
        }
    }

    pub fn eval(&self, context: &Context) -> bool {
        match self {
            Condition::Always => true,
            Condition::OutcomeEq(value) => context.get_string("outcome", "") == *value,
            Condition::ContextEq { key, literal } => {
                context.contains(key) && context.get_string(key, "") == *literal
            }
            Condition::ContextNe { key, literal } => {
                !context.contains(key) || context.get_string(key, "") != *literal
            }
            Condition::ContextMatch { key, pattern } => {
                context.contains(key) && pattern.is_match(&context.get_string(key, ""))
            }
        }
    }
}

/// Parse the condition grammar.
pub fn parse_condition(text: &str) -> Result<Condition> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Condition::Always);
    }

    if let Some(value) = text.strip_prefix("outcome=") {
        return Ok(Condition::OutcomeEq(value.trim().to_string()));
    }

    if let Some(rest) = text.strip_prefix("context.") {
        // Order matters: '!=' before '=', '~' has no '='.
        if let Some((key, literal)) = rest.split_once("!=") {
            return Ok(Condition::ContextNe {
                key: key.trim().to_string(),
                literal: literal.trim().to_string(),
            });
        }
        if let Some((key, pattern)) = rest.split_once('~') {
            let pattern = Regex::new(pattern.trim()).map_err(|error| {
                PipelineError::Validation(format!("invalid condition regex: {error}"))
            })?;
            return Ok(Condition::ContextMatch {
                key: key.trim().to_string(),
                pattern,
            });
        }
        if let Some((key, literal)) = rest.split_once('=') {
            return Ok(Condition::ContextEq {
                key: key.trim().to_string(),
                literal: literal.trim().to_string(),
            });
        }
    }

    Err(PipelineError::Validation(format!(
        "unrecognized edge condition '{text}'"
    )))
}

/// Evaluate an edge's condition; edges with no condition always pass.
/// A condition that fails to parse at run time evaluates false.
fn edge_passes(edge: &Edge, context: &Context) -> bool {
    match edge.condition() {
        None => true,
        Some(text) => match parse_condition(text) {
            Ok(condition) => condition.eval(context),
            Err(_) => false,
        },
    }
}

/// All outgoing edges whose condition passes, in source order.
pub fn candidate_edges<'g>(graph: &'g Graph, node_id: &str, context: &Context) -> Vec<&'g Edge> {
    graph
        .outgoing(node_id)
        .into_iter()
        .filter(|edge| edge_passes(edge, context))
        .collect()
}

/// Pick the single next edge for a completed node, or `None` when no
/// candidate survives.
pub fn select_edge<'g>(
    graph: &'g Graph,
    node_id: &str,
    outcome: &Outcome,
    context: &Context,
) -> Option<&'g Edge> {
    let mut candidates = candidate_edges(graph, node_id, context);
    if candidates.is_empty() {
        return None;
    }

    if let Some(preferred) = &outcome.preferred_label {
        let labeled: Vec<&Edge> = candidates
            .iter()
            .copied()
            .filter(|edge| edge.matches_label(preferred))
            .collect();
        if !labeled.is_empty() {
            candidates = labeled;
        }
    }

    // Highest priority, then highest weight; the scan keeps the earliest
    // edge on full ties, preserving source-declaration order.
    let mut best: Option<&Edge> = None;
    for edge in candidates {
        let better = match best {
            None => true,
            Some(current) => {
                (edge.priority(), edge.weight()) > (current.priority(), current.weight())
            }
        };
        if better {
            best = Some(edge);
        }
    }
    best
}
