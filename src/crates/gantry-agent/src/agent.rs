//! The agent loop: drives an LLM session through tool calls until a
//! terminal response, then bridges the result into codergen stages.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_core::{CodergenBackend, CodergenOutput, Context, Node, PipelineError};
use gantry_llm::{generate, Client, GenerateOptions, GenerateResult, Tool};

use crate::env::ExecutionEnvironment;
use crate::profile::ProviderProfile;

/// One agent: a unified client, a profile, and an execution environment.
pub struct AgentLoop {
    client: Client,
    profile: ProviderProfile,
    environment: Arc<dyn ExecutionEnvironment>,
    max_tool_rounds: u32,
}

impl AgentLoop {
    pub fn new(
        client: Client,
        profile: ProviderProfile,
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        Self {
            client,
            profile,
            environment,
            max_tool_rounds: 24,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    fn toolset(&self) -> Vec<Tool> {
        let mut tools = crate::tools::standard_tools(self.environment.clone());
        tools.extend(self.profile.extra_tools.iter().cloned());
        tools
    }

    fn options(&self, prompt: &str) -> GenerateOptions {
        let mut options = GenerateOptions::new(self.profile.model.clone())
            .with_provider(self.profile.provider.clone())
            .with_system(self.profile.render_system_prompt(self.environment.as_ref()))
            .with_prompt(prompt)
            .with_tools(self.toolset())
            .with_max_tool_rounds(self.max_tool_rounds);
        if let Some(effort) = self.profile.reasoning_effort {
            options = options.with_reasoning_effort(effort);
        }
        options
    }

    /// Run one session to a terminal response.
    pub async fn run(&self, prompt: &str) -> gantry_llm::Result<GenerateResult> {
        tracing::debug!(model = %self.profile.model, "agent session");
        generate(&self.client, self.options(prompt)).await
    }
}

#[async_trait]
impl CodergenBackend for AgentLoop {
    async fn run(
        &self,
        node: &Node,
        prompt: &str,
        _context: &Context,
    ) -> gantry_core::Result<CodergenOutput> {
        // Node attributes override the profile's defaults.
        let mut options = self.options(prompt);
        if let Some(model) = node.attr_str("llm_model") {
            options.model = model.to_string();
        }
        if let Some(provider) = node.attr_str("llm_provider") {
            options.provider = Some(provider.to_string());
        }
        if let Some(effort) = ProviderProfile::effort_from_name(node.reasoning_effort()) {
            options.reasoning_effort = Some(effort);
        }
        if let Some(timeout_ms) = node.timeout_ms() {
            options.timeout = Some(std::time::Duration::from_millis(timeout_ms.max(0) as u64));
        }

        let result = generate(&self.client, options)
            .await
            .map_err(PipelineError::Llm)?;
        Ok(CodergenOutput::Text(result.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;
    use async_trait::async_trait;
    use gantry_llm::{
        ContentPart, EventStream, FinishReason, LlmError, Message, ProviderAdapter, Request,
        Response, Role, StreamEvent, ToolArguments, Usage,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider that asks for one shell tool call, then answers with the
    /// tool's output embedded.
    struct ShellOnceProvider {
        requests: Mutex<Vec<Request>>,
    }

    impl ShellOnceProvider {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }

        fn assistant(parts: Vec<ContentPart>, finish: FinishReason) -> Response {
            Response {
                id: "r".into(),
                model: "m".into(),
                provider: "mock".into(),
                message: Message::new(Role::Assistant, parts),
                finish_reason: finish,
                finish_reason_raw: None,
                usage: Usage::new(1, 1),
                rate_limit: None,
                warnings: Vec::new(),
                raw: None,
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ShellOnceProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn complete(&self, request: &Request) -> gantry_llm::Result<Response> {
            let round = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            if round == 1 {
                Ok(Self::assistant(
                    vec![ContentPart::ToolCall {
                        id: "c1".into(),
                        name: "shell".into(),
                        arguments: ToolArguments::Json(json!({"command": "echo agent-was-here"})),
                    }],
                    FinishReason::ToolCalls,
                ))
            } else {
                // Echo the tool result back as the final answer.
                let previous = request
                    .messages
                    .last()
                    .map(|message| format!("{:?}", message.content))
                    .unwrap_or_default();
                Ok(Self::assistant(
                    vec![ContentPart::text(format!("done: {previous}"))],
                    FinishReason::Stop,
                ))
            }
        }

        async fn stream(&self, _request: &Request) -> gantry_llm::Result<EventStream> {
            let events: Vec<gantry_llm::Result<StreamEvent>> = vec![Err(LlmError::Stream(
                "not used in this test".into(),
            ))];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn agent_executes_tools_against_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let environment = Arc::new(LocalEnvironment::new(dir.path()));
        let provider = Arc::new(ShellOnceProvider::new());
        let client = Client::new().register(provider.clone());
        let profile = ProviderProfile::new("mock", "m");

        let agent = AgentLoop::new(client, profile, environment);
        let result = agent.run("run the probe command").await.unwrap();

        assert_eq!(result.steps.len(), 2);
        assert!(result.text.starts_with("done:"));
        assert!(result.text.contains("agent-was-here"));

        // The first request advertised the standard tool registry.
        let requests = provider.requests.lock().unwrap();
        let names: Vec<&str> = requests[0]
            .tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect();
        assert!(names.contains(&"shell"));
        assert!(names.contains(&"read_file"));

        // The second request carried the executed tool result.
        let last = requests[1].messages.last().unwrap();
        assert!(matches!(last.content[0], ContentPart::ToolResult { .. }));
    }

    #[tokio::test]
    async fn node_attributes_override_profile() {
        use gantry_core::{Graph, RawEdge, RawGraph, RawNode};

        let raw = RawGraph::new("g")
            .with_node(RawNode::new("s").with_shape("Mdiamond"))
            .with_node(
                RawNode::new("work")
                    .with_shape("box")
                    .with_attr("prompt", "p")
                    .with_attr("llm_model", "other-model")
                    .with_attr("reasoning_effort", "low"),
            )
            .with_node(RawNode::new("e").with_shape("Msquare"))
            .with_edge(RawEdge::new("s", "work"))
            .with_edge(RawEdge::new("work", "e"));
        let graph = Graph::compile(raw).unwrap();
        let node = graph.node("work").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let environment = Arc::new(LocalEnvironment::new(dir.path()));
        let provider = Arc::new(ShellOnceProvider::new());
        let client = Client::new().register(provider.clone());
        let agent = AgentLoop::new(
            client,
            ProviderProfile::new("mock", "profile-model"),
            environment,
        );

        let output = CodergenBackend::run(&agent, node, "p", &Context::new())
            .await
            .unwrap();
        assert!(matches!(output, CodergenOutput::Text(_)));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "other-model");
        assert_eq!(
            requests[0].reasoning_effort,
            Some(gantry_llm::ReasoningEffort::Low)
        );
    }
}
