//! OpenAI Responses-style adapter.
//!
//! Translation contract:
//! - system and developer messages concatenate into the top-level
//!   `instructions` string; the conversation goes into the `input` array.
//! - user content uses `input_text` / `input_image` parts; assistant text
//!   becomes a `message` item with `output_text` content.
//! - tool calls are `function_call` items, tool results are
//!   `function_call_output` items keyed by `call_id`.
//! - `tool_choice`: auto/none/required as bare strings, named as
//!   `{type: function, function: {name}}`.
//! - `response_format`: json_schema → `text.format` with the schema,
//!   json → `{type: json_object}`.
//! - `reasoning_effort` (except `none`) → `reasoning.effort`.

use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::ProviderConfig;
use crate::error::{error_from_status, LlmError, Result};
use crate::message::{merge_consecutive_same_role, ContentPart, ImageSource, Message, Role, ToolArguments};
use crate::provider::{merge_provider_options, parse_rate_limit, ProviderAdapter};
use crate::request::{ReasoningEffort, Request, ResponseFormat};
use crate::response::{FinishReason, RateLimitInfo, Response, Usage};
use crate::stream::{EventStream, StreamEvent};
use crate::tools::ToolChoice;
use crate::transport::{
    error_message_from_body, HttpTransport, StreamOpen, Transport, TransportRequest,
};

pub const PROVIDER_NAME: &str = "openai";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Responses API adapter.
#[derive(Clone)]
pub struct OpenAiAdapter {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
}

impl OpenAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.timeout));
        Self { config, transport }
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn from_env() -> Result<Self> {
        let mut config =
            ProviderConfig::from_env("OPENAI_API_KEY", "OPENAI_BASE_URL", DEFAULT_BASE_URL)?;
        if let Ok(organization) = std::env::var("OPENAI_ORG_ID") {
            config = config.with_organization(organization);
        }
        if let Ok(project) = std::env::var("OPENAI_PROJECT_ID") {
            config = config.with_project(project);
        }
        Ok(Self::new(config))
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    fn transport_request(&self, body: Value) -> TransportRequest {
        let mut request = TransportRequest::new(self.endpoint(), body)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json");
        if let Some(organization) = &self.config.organization {
            request = request.header("openai-organization", organization);
        }
        if let Some(project) = &self.config.project {
            request = request.header("openai-project", project);
        }
        request
    }

    fn build_body(&self, request: &Request, stream: bool) -> (Value, Vec<String>) {
        let mut warnings = Vec::new();
        let merged = merge_consecutive_same_role(&request.messages);

        let mut instructions: Vec<String> = Vec::new();
        let mut input: Vec<Value> = Vec::new();

        for message in &merged {
            match message.role {
                Role::System | Role::Developer => instructions.push(message.text()),
                Role::User | Role::Tool => {
                    convert_user_message(message, &mut input, &mut warnings);
                }
                Role::Assistant => {
                    convert_assistant_message(message, &mut input);
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert("input".to_string(), Value::Array(input));
        if !instructions.is_empty() {
            body.insert("instructions".to_string(), json!(instructions.join("\n\n")));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_output_tokens".to_string(), json!(max_tokens));
        }
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }

        if !request.tools.is_empty() && request.tool_choice != ToolChoice::None {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".to_string(), Value::Array(tools));
            let choice = match &request.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Named(name) => json!({"type": "function", "function": {"name": name}}),
                ToolChoice::None => unreachable!("tools omitted for none"),
            };
            body.insert("tool_choice".to_string(), choice);
        }

        match &request.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json => {
                body.insert("text".to_string(), json!({"format": {"type": "json_object"}}));
            }
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => {
                let mut format = Map::new();
                format.insert("type".to_string(), json!("json_schema"));
                format.insert(
                    "name".to_string(),
                    json!(name.clone().unwrap_or_else(|| "output".to_string())),
                );
                format.insert("schema".to_string(), schema.clone());
                if let Some(strict) = strict {
                    format.insert("strict".to_string(), json!(strict));
                }
                body.insert("text".to_string(), json!({"format": Value::Object(format)}));
            }
        }

        match request.reasoning_effort {
            None | Some(ReasoningEffort::None) => {}
            Some(effort) => {
                let effort = match effort {
                    ReasoningEffort::Low => "low",
                    ReasoningEffort::Medium => "medium",
                    ReasoningEffort::High => "high",
                    ReasoningEffort::None => unreachable!(),
                };
                body.insert("reasoning".to_string(), json!({"effort": effort}));
            }
        }

        merge_provider_options(&mut body, request, PROVIDER_NAME);
        (Value::Object(body), warnings)
    }

    fn parse_response(
        &self,
        wire: WireResponse,
        rate_limit: Option<RateLimitInfo>,
        warnings: Vec<String>,
        raw: Option<Value>,
    ) -> Response {
        let mut parts = Vec::new();
        let mut saw_tool_call = false;

        for item in wire.output {
            match item {
                WireOutputItem::Message { content } => {
                    for piece in content {
                        if let WireOutputContent::OutputText { text } = piece {
                            parts.push(ContentPart::Text { text });
                        }
                    }
                }
                WireOutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    saw_tool_call = true;
                    parts.push(ContentPart::ToolCall {
                        id: call_id,
                        name,
                        arguments: ToolArguments::Raw(arguments),
                    });
                }
                WireOutputItem::Reasoning { summary } => {
                    let text: String = summary
                        .into_iter()
                        .filter_map(|piece| match piece {
                            WireReasoningPiece::SummaryText { text } => Some(text),
                            WireReasoningPiece::Other => None,
                        })
                        .collect();
                    if !text.is_empty() {
                        parts.push(ContentPart::Thinking {
                            text,
                            signature: None,
                        });
                    }
                }
                WireOutputItem::Other => {}
            }
        }

        let (finish_reason, finish_raw) = if saw_tool_call {
            (FinishReason::ToolCalls, wire.status.clone())
        } else {
            match wire
                .incomplete_details
                .as_ref()
                .and_then(|details| details.reason.as_deref())
            {
                Some("max_output_tokens") => {
                    (FinishReason::Length, Some("max_output_tokens".to_string()))
                }
                Some("content_filter") => {
                    (FinishReason::ContentFilter, Some("content_filter".to_string()))
                }
                Some(other) => (FinishReason::Other, Some(other.to_string())),
                None => match wire.status.as_deref() {
                    Some("completed") => (FinishReason::Stop, wire.status.clone()),
                    Some("failed") => (FinishReason::Error, wire.status.clone()),
                    _ => (FinishReason::Other, wire.status.clone()),
                },
            }
        };

        let usage = wire
            .usage
            .map(|usage| Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage
                    .total_tokens
                    .unwrap_or(usage.input_tokens + usage.output_tokens),
                reasoning_tokens: usage
                    .output_tokens_details
                    .and_then(|details| details.reasoning_tokens),
                cache_read_tokens: usage
                    .input_tokens_details
                    .and_then(|details| details.cached_tokens),
                cache_write_tokens: None,
            })
            .unwrap_or_default();

        Response {
            id: wire.id,
            model: wire.model,
            provider: PROVIDER_NAME.to_string(),
            message: Message::new(Role::Assistant, parts),
            finish_reason,
            finish_reason_raw: finish_raw,
            usage,
            rate_limit,
            warnings,
            raw,
        }
    }
}

fn convert_user_message(message: &Message, input: &mut Vec<Value>, warnings: &mut Vec<String>) {
    let mut content: Vec<Value> = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text } => {
                content.push(json!({"type": "input_text", "text": text}));
            }
            ContentPart::Image { source } => {
                let image_url = match source {
                    ImageSource::Url { url } => url.clone(),
                    ImageSource::Base64 { media_type, data } => {
                        format!("data:{media_type};base64,{data}")
                    }
                };
                content.push(json!({"type": "input_image", "image_url": image_url}));
            }
            ContentPart::ToolResult {
                tool_call_id,
                content: output,
                is_error,
            } => {
                // Tool results are standalone items, not message content.
                let output = if *is_error {
                    format!("[error] {output}")
                } else {
                    output.clone()
                };
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": output,
                }));
            }
            ContentPart::Audio { .. } | ContentPart::Document { .. } => {
                warnings.push(format!(
                    "{PROVIDER_NAME} adapter drops unsupported input part"
                ));
            }
            ContentPart::ToolCall { .. }
            | ContentPart::Thinking { .. }
            | ContentPart::RedactedThinking { .. } => {}
        }
    }
    if !content.is_empty() {
        input.push(json!({"type": "message", "role": "user", "content": content}));
    }
}

fn convert_assistant_message(message: &Message, input: &mut Vec<Value>) {
    let mut content: Vec<Value> = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text } => {
                content.push(json!({"type": "output_text", "text": text}));
            }
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                input.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": arguments.to_json_string(),
                }));
            }
            _ => {}
        }
    }
    if !content.is_empty() {
        input.push(json!({"type": "message", "role": "assistant", "content": content}));
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports_json_schema(&self) -> bool {
        true
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let (body, warnings) = self.build_body(request, false);
        tracing::debug!(model = %request.model, "openai complete");

        let response = self.transport.request(self.transport_request(body)).await?;
        let rate_limit = parse_rate_limit(&response.headers);

        if !response.is_success() {
            let message = error_message_from_body(&response.body);
            let mut error = error_from_status(response.status, message, PROVIDER_NAME);
            if let LlmError::RateLimited { retry_after, .. } = &mut error {
                *retry_after = response
                    .header("retry-after")
                    .and_then(|value| value.parse().ok())
                    .map(std::time::Duration::from_secs);
            }
            return Err(error);
        }

        let raw: Value = serde_json::from_str(&response.body)?;
        let wire: WireResponse = serde_json::from_str(&response.body)?;
        Ok(self.parse_response(wire, rate_limit, warnings, Some(raw)))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        let (body, warnings) = self.build_body(request, true);
        tracing::debug!(model = %request.model, "openai stream");

        let open = self.transport.stream(self.transport_request(body)).await?;
        let (headers, mut frames) = match open {
            StreamOpen::Failure { status, body, .. } => {
                let message = error_message_from_body(&body);
                return Err(error_from_status(status, message, PROVIDER_NAME));
            }
            StreamOpen::Events {
                frames, headers, ..
            } => (headers, frames),
        };

        let rate_limit = parse_rate_limit(&headers);
        let adapter = self.clone();
        let stream = try_stream! {
            let mut finished = false;

            while let Some(frame) = frames.next().await {
                let frame = frame?;
                if frame.data.trim() == "[DONE]" {
                    break;
                }
                let Ok(payload) = serde_json::from_str::<Value>(&frame.data) else {
                    continue;
                };
                let kind = payload
                    .get("type")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| frame.event.clone());

                match kind.as_str() {
                    "response.created" => {
                        yield StreamEvent::StreamStart {
                            id: payload
                                .pointer("/response/id")
                                .and_then(Value::as_str)
                                .map(String::from),
                            model: payload
                                .pointer("/response/model")
                                .and_then(Value::as_str)
                                .map(String::from),
                        };
                    }
                    "response.in_progress" => {}
                    "response.output_item.added" => {
                        let index = payload
                            .get("output_index")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        match payload.pointer("/item/type").and_then(Value::as_str) {
                            Some("message") => yield StreamEvent::TextStart { index },
                            Some("function_call") => {
                                yield StreamEvent::ToolCallStart {
                                    index,
                                    id: payload
                                        .pointer("/item/call_id")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default()
                                        .to_string(),
                                    name: payload
                                        .pointer("/item/name")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default()
                                        .to_string(),
                                };
                            }
                            _ => {}
                        }
                    }
                    "response.output_text.delta" => {
                        yield StreamEvent::TextDelta {
                            index: payload
                                .get("output_index")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as usize,
                            delta: payload
                                .get("delta")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        };
                    }
                    "response.output_text.done" => {
                        yield StreamEvent::TextEnd {
                            index: payload
                                .get("output_index")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as usize,
                        };
                    }
                    "response.function_call_arguments.delta" => {
                        yield StreamEvent::ToolCallDelta {
                            index: payload
                                .get("output_index")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as usize,
                            arguments_delta: payload
                                .get("delta")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        };
                    }
                    "response.output_item.done" => {
                        let index = payload
                            .get("output_index")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        if payload.pointer("/item/type").and_then(Value::as_str)
                            == Some("function_call")
                        {
                            yield StreamEvent::ToolCallEnd { index };
                        }
                    }
                    "response.completed" => {
                        let envelope = payload.get("response").cloned().unwrap_or(Value::Null);
                        let wire: WireResponse = serde_json::from_value(envelope.clone())
                            .map_err(|e| LlmError::Stream(e.to_string()))?;
                        let response = adapter.parse_response(
                            wire,
                            rate_limit.clone(),
                            warnings.clone(),
                            Some(envelope),
                        );
                        finished = true;
                        yield StreamEvent::Finish { response };
                    }
                    "response.failed" | "error" => {
                        let message = payload
                            .pointer("/response/error/message")
                            .or_else(|| payload.pointer("/error/message"))
                            .or_else(|| payload.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("provider stream error")
                            .to_string();
                        yield StreamEvent::Error { message };
                        return;
                    }
                    _ => {
                        yield StreamEvent::Provider {
                            provider: PROVIDER_NAME.to_string(),
                            payload,
                        };
                    }
                }
            }

            if !finished {
                Err(LlmError::Stream(
                    "openai stream ended without response.completed".to_string(),
                ))?;
            }
        };

        Ok(Box::pin(stream))
    }
}

// Wire types for the blocking response envelope.

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<WireOutputItem>,
    #[serde(default)]
    incomplete_details: Option<WireIncompleteDetails>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireOutputItem {
    Message {
        content: Vec<WireOutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<WireReasoningPiece>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireOutputContent {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireReasoningPiece {
    SummaryText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireIncompleteDetails {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    total_tokens: Option<u64>,
    input_tokens_details: Option<WireInputTokensDetails>,
    output_tokens_details: Option<WireOutputTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct WireInputTokensDetails {
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireOutputTokensDetails {
    reasoning_tokens: Option<u64>,
}
