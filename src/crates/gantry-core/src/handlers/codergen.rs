//! Codergen: LLM-backed work stages.
//!
//! The handler expands the node's prompt against the context, persists it
//! to the stage log, delegates to a pluggable [`CodergenBackend`], and
//! persists the raw response. Without a backend it runs in simulation
//! mode and returns a deterministic placeholder, which keeps pipelines
//! runnable and reproducible with no credentials.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::{EngineServices, Handler};
use crate::outcome::Outcome;
use crate::vars::expand_in_context;

/// What a backend hands back for one stage.
pub enum CodergenOutput {
    /// A bare string response, wrapped into a SUCCESS outcome with the
    /// raw text as notes.
    Text(String),
    /// A fully formed outcome, forwarded as-is.
    Outcome(Outcome),
}

/// The LLM backend behind codergen stages.
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node: &Node, prompt: &str, context: &Context) -> Result<CodergenOutput>;
}

/// Deterministic FIFO backend for tests and dry runs: replays a scripted
/// sequence of outputs, then falls back to simulation text.
#[derive(Default)]
pub struct ScriptedBackend {
    outputs: Mutex<VecDeque<CodergenOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(outputs: Vec<CodergenOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn text(outputs: Vec<&str>) -> Self {
        Self::new(
            outputs
                .into_iter()
                .map(|text| CodergenOutput::Text(text.to_string()))
                .collect(),
        )
    }

    /// Node ids this backend was invoked for, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodergenBackend for ScriptedBackend {
    async fn run(&self, node: &Node, _prompt: &str, _context: &Context) -> Result<CodergenOutput> {
        self.calls.lock().unwrap().push(node.id.clone());
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| CodergenOutput::Text(simulated_response(&node.id))))
    }
}

fn simulated_response(node_id: &str) -> String {
    format!("[simulated] {node_id}")
}

/// Responses longer than this are truncated in the `last_output` context
/// key; the full text stays in `last_output_full`.
const OUTPUT_TRUNCATION_LIMIT: usize = 200;

fn truncate_output(text: &str) -> String {
    if text.len() <= OUTPUT_TRUNCATION_LIMIT {
        return text.to_string();
    }
    let boundary = (0..=OUTPUT_TRUNCATION_LIMIT)
        .rev()
        .find(|&index| text.is_char_boundary(index))
        .unwrap_or(0);
    format!("{}...", &text[..boundary])
}

/// Handler for codergen nodes (and goal gates, which are codergen nodes
/// with `goal_gate=true`; the gate semantics live in the engine).
pub struct CodergenHandler;

#[async_trait]
impl Handler for CodergenHandler {
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let raw_prompt = node.prompt().unwrap_or_else(|| node.label());
        let prompt = expand_in_context(raw_prompt, context);

        services
            .log_store
            .write_stage_file(&node.id, "prompt.md", &prompt)?;
        tracing::debug!(node = %node.id, "codergen stage");

        let output = match &services.backend {
            None => CodergenOutput::Text(simulated_response(&node.id)),
            // A cancellation must unblock an in-flight LLM call.
            Some(backend) => {
                let run = tokio::select! {
                    run = backend.run(node, &prompt, context) => run,
                    _ = services.cancellation.cancelled() => {
                        return Err(crate::error::PipelineError::Cancelled);
                    }
                };
                match run {
                    Ok(output) => output,
                    Err(error) => {
                        return Ok(Outcome::fail(error.to_string()));
                    }
                }
            }
        };

        match output {
            CodergenOutput::Outcome(outcome) => {
                if let Some(notes) = &outcome.notes {
                    services
                        .log_store
                        .write_stage_file(&node.id, "response.md", notes)?;
                }
                Ok(outcome)
            }
            CodergenOutput::Text(text) => {
                services
                    .log_store
                    .write_stage_file(&node.id, "response.md", &text)?;
                let outcome = Outcome::success()
                    .with_notes(text.clone())
                    .with_update("last_output", Value::String(truncate_output(&text)))
                    .with_update("last_output_full", Value::String(text));
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::services_fixture;
    use crate::graph::tests::linear_raw;
    use crate::graph::Graph;
    use crate::logstore::MemoryLogStore;
    use crate::outcome::StageStatus;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn expands_prompt_and_persists_logs() {
        let graph = Graph::compile(linear_raw()).unwrap();
        let store = MemoryLogStore::new();
        let fixture = services_fixture(&graph)
            .with_backend(Arc::new(ScriptedBackend::text(vec!["DONE"])))
            .with_log_store(Arc::new(store.clone()));
        let services = fixture.services();

        let mut context = Context::new();
        context.set("goal", json!("a REST API"));

        let node = graph.node("codegen").unwrap();
        let outcome = CodergenHandler
            .execute(node, &context, &services)
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("DONE"));
        assert_eq!(
            store.file("codegen/prompt.md").as_deref(),
            Some("Build a REST API")
        );
        assert_eq!(store.file("codegen/response.md").as_deref(), Some("DONE"));
        assert_eq!(
            outcome.context_updates["last_output_full"],
            json!("DONE")
        );
    }

    #[tokio::test]
    async fn simulation_mode_without_backend() {
        let graph = Graph::compile(linear_raw()).unwrap();
        let fixture = services_fixture(&graph);
        let services = fixture.services();

        let node = graph.node("codegen").unwrap();
        let outcome = CodergenHandler
            .execute(node, &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("[simulated] codegen"));
    }

    #[tokio::test]
    async fn backend_error_becomes_fail_outcome() {
        struct FailingBackend;

        #[async_trait]
        impl CodergenBackend for FailingBackend {
            async fn run(
                &self,
                _node: &Node,
                _prompt: &str,
                _context: &Context,
            ) -> Result<CodergenOutput> {
                Err(crate::error::PipelineError::Custom("llm unreachable".into()))
            }
        }

        let graph = Graph::compile(linear_raw()).unwrap();
        let fixture = services_fixture(&graph).with_backend(Arc::new(FailingBackend));
        let services = fixture.services();

        let node = graph.node("codegen").unwrap();
        let outcome = CodergenHandler
            .execute(node, &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.failure_reason.as_deref(), Some("llm unreachable"));
    }

    #[tokio::test]
    async fn full_outcome_is_forwarded() {
        let graph = Graph::compile(linear_raw()).unwrap();
        let backend = ScriptedBackend::new(vec![CodergenOutput::Outcome(
            Outcome::retry().with_notes("flaky"),
        )]);
        let fixture = services_fixture(&graph).with_backend(Arc::new(backend));
        let services = fixture.services();

        let node = graph.node("codegen").unwrap();
        let outcome = CodergenHandler
            .execute(node, &Context::new(), &services)
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Retry);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let short = "short";
        assert_eq!(truncate_output(short), "short");

        let long = "é".repeat(150); // 300 bytes
        let truncated = truncate_output(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= OUTPUT_TRUNCATION_LIMIT + 3);
    }
}
