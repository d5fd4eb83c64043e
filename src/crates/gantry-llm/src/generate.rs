//! High-level generation: a bounded tool-call loop over `Client::complete`.
//!
//! `generate` builds the conversation, calls the provider, executes any
//! tool calls through the supplied executors, feeds results back, and
//! repeats until a terminal condition: a non-tool finish reason, the
//! caller's `stop_when` predicate, `max_tool_rounds` exhausted, only
//! passive tools requested, cancellation, or the total timeout.
//!
//! Tool execution failures never abort the loop; they become `is_error`
//! tool results the model sees on the next round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cancel::{run_bounded, CancellationToken};
use crate::client::Client;
use crate::error::{LlmError, Result};
use crate::message::{ContentPart, Message, Role, ToolCallView};
use crate::request::{ReasoningEffort, Request, ResponseFormat};
use crate::response::{FinishReason, Response, Usage};
use crate::tools::{Tool, ToolChoice};

/// Default bound on tool rounds; the loop makes at most this many
/// tool-execution rounds plus one final provider call.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// Predicate consulted after each step; returning true ends the loop.
pub type StopWhen = Arc<dyn Fn(&StepResult) -> bool + Send + Sync>;

/// Options for [`generate`] and [`crate::stream_text::stream`].
#[derive(Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub provider: Option<String>,
    /// Prepended as a system message.
    pub system: Option<String>,
    /// Single-turn convenience; mutually exclusive with `messages`.
    pub prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub tool_choice: ToolChoice,
    pub response_format: ResponseFormat,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub provider_options: HashMap<String, serde_json::Map<String, Value>>,
    pub max_tool_rounds: u32,
    pub stop_when: Option<StopWhen>,
    /// Total wall-clock budget across all rounds.
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            system: None,
            prompt: None,
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            response_format: ResponseFormat::Text,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop_sequences: Vec::new(),
            reasoning_effort: None,
            provider_options: HashMap::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            stop_when: None,
            timeout: None,
            cancellation: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_stop_when(
        mut self,
        predicate: impl Fn(&StepResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Validate `prompt`/`messages` exclusivity and build the opening
    /// conversation.
    pub(crate) fn initial_messages(&self) -> Result<Vec<Message>> {
        let mut conversation = Vec::new();
        if let Some(system) = &self.system {
            conversation.push(Message::system(system.clone()));
        }
        match (&self.prompt, self.messages.is_empty()) {
            (Some(_), false) => {
                return Err(LlmError::Configuration(
                    "pass either prompt or messages, not both".into(),
                ));
            }
            (Some(prompt), true) => conversation.push(Message::user(prompt.clone())),
            (None, false) => conversation.extend(self.messages.iter().cloned()),
            (None, true) => {
                return Err(LlmError::Configuration(
                    "one of prompt or messages is required".into(),
                ));
            }
        }
        Ok(conversation)
    }

    pub(crate) fn to_request(&self, messages: Vec<Message>) -> Request {
        let mut request = Request::new(self.model.clone(), messages);
        request.provider = self.provider.clone();
        request.tools = self
            .tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect();
        request.tool_choice = self.tool_choice.clone();
        request.response_format = self.response_format.clone();
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.max_tokens = self.max_tokens;
        request.stop_sequences = self.stop_sequences.clone();
        request.reasoning_effort = self.reasoning_effort;
        request.provider_options = self.provider_options.clone();
        request
    }
}

/// Outcome of one tool execution, fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResultRecord {
    fn into_part(self) -> ContentPart {
        ContentPart::ToolResult {
            tool_call_id: self.tool_call_id,
            content: self.content,
            is_error: self.is_error,
        }
    }
}

/// One provider round inside the loop.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallView>,
    pub tool_results: Vec<ToolResultRecord>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub response: Response,
}

impl StepResult {
    fn from_response(response: Response) -> Self {
        Self {
            text: response.text(),
            reasoning: response.message.reasoning_text(),
            tool_calls: response.tool_calls(),
            tool_results: Vec::new(),
            finish_reason: response.finish_reason,
            usage: response.usage,
            response,
        }
    }
}

/// Final outcome of a `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Text of the final step.
    pub text: String,
    pub reasoning: Option<String>,
    pub steps: Vec<StepResult>,
    /// Element-wise sum of per-step usage.
    pub total_usage: Usage,
    pub finish_reason: FinishReason,
    /// The final step's full response.
    pub response: Response,
}

/// Execute every call in `calls` against the matching tool executors.
///
/// Unknown names and executor failures become `is_error` results; a
/// `null` return becomes empty content; any other value is
/// JSON-stringified (bare strings stay unquoted).
pub(crate) async fn run_tool_calls(tools: &[Tool], calls: &[ToolCallView]) -> Vec<ToolResultRecord> {
    let by_name: HashMap<&str, &Tool> = tools.iter().map(|tool| (tool.name(), tool)).collect();
    let mut records = Vec::with_capacity(calls.len());

    for call in calls {
        let record = match by_name.get(call.name.as_str()) {
            None => ToolResultRecord {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: format!("Unknown tool {}", call.name),
                is_error: true,
            },
            Some(tool) if tool.is_passive() => ToolResultRecord {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: format!("tool '{}' has no executor", call.name),
                is_error: true,
            },
            Some(tool) => match tool.execute(call.arguments.parsed()).await {
                Ok(Value::Null) => ToolResultRecord {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    content: String::new(),
                    is_error: false,
                },
                Ok(Value::String(text)) => ToolResultRecord {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    content: text,
                    is_error: false,
                },
                Ok(value) => ToolResultRecord {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    content: value.to_string(),
                    is_error: false,
                },
                Err(message) => ToolResultRecord {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    content: message,
                    is_error: true,
                },
            },
        };
        records.push(record);
    }
    records
}

/// Build the single user-role message carrying one result part per call.
pub(crate) fn tool_results_message(records: &[ToolResultRecord]) -> Message {
    Message::new(
        Role::User,
        records
            .iter()
            .cloned()
            .map(ToolResultRecord::into_part)
            .collect(),
    )
}

fn remaining_budget(deadline: Option<Instant>, total: Option<Duration>) -> Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                Err(LlmError::RequestTimeout(total.unwrap_or_default()))
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}

/// Run the bounded tool-call loop and return the final result.
pub async fn generate(client: &Client, options: GenerateOptions) -> Result<GenerateResult> {
    let mut conversation = options.initial_messages()?;
    let deadline = options.timeout.map(|total| Instant::now() + total);
    let signal = options.cancellation.clone();

    let mut steps: Vec<StepResult> = Vec::new();
    let mut rounds: u32 = 0;

    loop {
        if let Some(token) = &signal {
            if token.is_cancelled() {
                return Err(LlmError::Aborted);
            }
        }
        let budget = remaining_budget(deadline, options.timeout)?;
        let request = options.to_request(conversation.clone());
        let response = run_bounded(signal.as_ref(), budget, client.complete(request)).await?;

        let mut step = StepResult::from_response(response);
        let calls = step.tool_calls.clone();

        let tool_finish = step.finish_reason == FinishReason::ToolCalls && !calls.is_empty();
        let stop_requested = options
            .stop_when
            .as_ref()
            .map(|predicate| predicate(&step))
            .unwrap_or(false);
        let any_executable = calls
            .iter()
            .any(|call| options.tools.iter().any(|tool| {
                tool.name() == call.name && !tool.is_passive()
            }));

        if !tool_finish || stop_requested || rounds >= options.max_tool_rounds || !any_executable {
            steps.push(step);
            break;
        }

        let records = run_tool_calls(&options.tools, &calls).await;
        step.tool_results = records.clone();

        conversation.push(step.response.message.clone());
        conversation.push(tool_results_message(&records));
        steps.push(step);
        rounds += 1;
    }

    let total_usage = steps
        .iter()
        .fold(Usage::default(), |acc, step| acc.add(&step.usage));
    let last = steps.last().expect("loop always records a step");

    Ok(GenerateResult {
        text: last.text.clone(),
        reasoning: last.reasoning.clone(),
        finish_reason: last.finish_reason,
        response: last.response.clone(),
        total_usage,
        steps,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::message::ToolArguments;
    use crate::provider::ProviderAdapter;
    use crate::stream::{EventStream, StreamEvent};
    use crate::tools::ToolDefinition;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted list of responses and counts calls.
    pub(crate) struct ScriptedProvider {
        responses: Mutex<Vec<Response>>,
        pub(crate) calls: AtomicUsize,
        pub(crate) seen_requests: Mutex<Vec<Request>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(responses: Vec<Response>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                seen_requests: Mutex::new(Vec::new()),
            }
        }
    }

    pub(crate) fn text_response(text: &str) -> Response {
        Response {
            id: "r".into(),
            model: "m".into(),
            provider: "mock".into(),
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
            finish_reason_raw: None,
            usage: Usage::new(10, 5),
            rate_limit: None,
            warnings: Vec::new(),
            raw: None,
        }
    }

    pub(crate) fn tool_call_response(id: &str, name: &str, args: Value) -> Response {
        Response {
            id: "r".into(),
            model: "m".into(),
            provider: "mock".into(),
            message: Message::new(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments: ToolArguments::Json(args),
                }],
            ),
            finish_reason: FinishReason::ToolCalls,
            finish_reason_raw: None,
            usage: Usage::new(7, 3),
            rate_limit: None,
            warnings: Vec::new(),
            raw: None,
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn complete(&self, request: &Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_requests.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::Other("scripted provider exhausted".into()));
            }
            Ok(responses.remove(0))
        }

        async fn stream(&self, request: &Request) -> Result<EventStream> {
            let response = self.complete(request).await?;
            let mut events: Vec<Result<StreamEvent>> = vec![Ok(StreamEvent::StreamStart {
                id: Some(response.id.clone()),
                model: Some(response.model.clone()),
            })];
            let text = response.text();
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextStart { index: 0 }));
                events.push(Ok(StreamEvent::TextDelta {
                    index: 0,
                    delta: text,
                }));
                events.push(Ok(StreamEvent::TextEnd { index: 0 }));
            }
            events.push(Ok(StreamEvent::Finish { response }));
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn client_with(responses: Vec<Response>) -> (Client, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let client = Client::new().register(provider.clone());
        (client, provider)
    }

    fn echo_tool() -> Tool {
        Tool::with_executor(
            ToolDefinition::new("echo", "echoes", json!({"type": "object"})),
            |args| async move { Ok(args) },
        )
    }

    #[tokio::test]
    async fn prompt_and_messages_are_mutually_exclusive() {
        let (client, _) = client_with(vec![]);
        let options = GenerateOptions::new("m")
            .with_prompt("hi")
            .with_messages(vec![Message::user("hi")]);
        let error = generate(&client, options).await.unwrap_err();
        assert!(matches!(error, LlmError::Configuration(_)));

        let error = generate(&client, GenerateOptions::new("m")).await.unwrap_err();
        assert!(matches!(error, LlmError::Configuration(_)));
    }

    #[tokio::test]
    async fn single_round_without_tools() {
        let (client, provider) = client_with(vec![text_response("done")]);
        let result = generate(&client, GenerateOptions::new("m").with_prompt("go"))
            .await
            .unwrap();
        assert_eq!(result.text, "done");
        assert_eq!(result.steps.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.total_usage, Usage::new(10, 5));
    }

    #[tokio::test]
    async fn tool_loop_executes_and_feeds_back() {
        let (client, provider) = client_with(vec![
            tool_call_response("c1", "echo", json!({"word": "hi"})),
            text_response("final"),
        ]);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![echo_tool()]),
        )
        .await
        .unwrap();

        assert_eq!(result.text, "final");
        assert_eq!(result.steps.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        // First step recorded its executed tool result.
        let first = &result.steps[0];
        assert_eq!(first.tool_results.len(), 1);
        assert_eq!(first.tool_results[0].content, json!({"word": "hi"}).to_string());
        assert!(!first.tool_results[0].is_error);

        // Usage sums across steps.
        assert_eq!(result.total_usage, Usage::new(7, 3).add(&Usage::new(10, 5)));

        // The second request carried the assistant turn and a user-role
        // tool-result message.
        let requests = provider.seen_requests.lock().unwrap();
        let second = &requests[1];
        let penultimate = &second.messages[second.messages.len() - 2];
        let last = &second.messages[second.messages.len() - 1];
        assert_eq!(penultimate.role, Role::Assistant);
        assert_eq!(last.role, Role::User);
        assert!(matches!(last.content[0], ContentPart::ToolResult { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let (client, _) = client_with(vec![
            tool_call_response("c1", "nope", json!({})),
            text_response("ok"),
        ]);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![echo_tool()]),
        )
        .await
        .unwrap();
        let record = &result.steps[0].tool_results[0];
        assert!(record.is_error);
        assert_eq!(record.content, "Unknown tool nope");
    }

    #[tokio::test]
    async fn executor_failure_is_captured_not_raised() {
        let failing = Tool::with_executor(
            ToolDefinition::new("boom", "", json!({})),
            |_args| async move { Err("kaput".to_string()) },
        );
        let (client, _) = client_with(vec![
            tool_call_response("c1", "boom", json!({})),
            text_response("recovered"),
        ]);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![failing]),
        )
        .await
        .unwrap();
        assert_eq!(result.text, "recovered");
        let record = &result.steps[0].tool_results[0];
        assert!(record.is_error);
        assert_eq!(record.content, "kaput");
    }

    #[tokio::test]
    async fn null_return_becomes_empty_content() {
        let null_tool = Tool::with_executor(
            ToolDefinition::new("void", "", json!({})),
            |_args| async move { Ok(Value::Null) },
        );
        let records = run_tool_calls(
            &[null_tool],
            &[ToolCallView {
                id: "c1".into(),
                name: "void".into(),
                arguments: ToolArguments::Json(json!({})),
            }],
        )
        .await;
        assert_eq!(records[0].content, "");
        assert!(!records[0].is_error);
    }

    #[tokio::test]
    async fn passive_tools_stop_the_loop() {
        let passive = Tool::passive(ToolDefinition::new("hint", "", json!({})));
        let (client, provider) = client_with(vec![tool_call_response("c1", "hint", json!({}))]);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![passive]),
        )
        .await
        .unwrap();
        // One provider call, control returned to the caller.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert!(result.steps[0].tool_results.is_empty());
    }

    #[tokio::test]
    async fn max_tool_rounds_bounds_provider_calls() {
        // Provider always wants another round; loop must stop at N+1 calls.
        let responses: Vec<Response> = (0..10)
            .map(|i| tool_call_response(&format!("c{i}"), "echo", json!({})))
            .collect();
        let (client, provider) = client_with(responses);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![echo_tool()])
                .with_max_tool_rounds(3),
        )
        .await
        .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4); // N + 1
        assert_eq!(result.steps.len(), 4);
    }

    #[tokio::test]
    async fn stop_when_predicate_ends_loop() {
        let (client, provider) = client_with(vec![
            tool_call_response("c1", "echo", json!({})),
            tool_call_response("c2", "echo", json!({})),
        ]);
        let result = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_tools(vec![echo_tool()])
                .with_stop_when(|step| !step.tool_calls.is_empty()),
        )
        .await
        .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn pre_aborted_token_raises_abort() {
        let (client, _) = client_with(vec![text_response("never")]);
        let token = CancellationToken::new();
        token.cancel();
        let error = generate(
            &client,
            GenerateOptions::new("m")
                .with_prompt("go")
                .with_cancellation(token),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, LlmError::Aborted));
    }
}
