//! Anthropic Messages-style adapter.
//!
//! Translation contract:
//! - system (and developer) messages become the top-level `system` block
//!   list; the last block gets `cache_control: ephemeral` unless the
//!   `auto_cache` provider option is `false`.
//! - tool definitions use `input_schema`; `tool_choice` maps auto→`auto`,
//!   required→`any`, named→`tool`. For `none` the tools array and the
//!   `tool_choice` field are omitted entirely.
//! - tool results travel as user-role messages with `tool_result` blocks.
//! - `max_tokens` is mandatory on the wire; defaults to 4096.
//! - thinking content round-trips as `thinking` blocks plus a beta header.

use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::ProviderConfig;
use crate::error::{error_from_status, LlmError, Result};
use crate::message::{ContentPart, ImageSource, Message, Role, ToolArguments};
use crate::message::merge_consecutive_same_role;
use crate::provider::{merge_provider_options, parse_rate_limit, ProviderAdapter};
use crate::request::{ReasoningEffort, Request, ResponseFormat};
use crate::response::{FinishReason, RateLimitInfo, Response, Usage};
use crate::stream::{EventStream, StreamEvent};
use crate::tools::ToolChoice;
use crate::transport::{
    error_message_from_body, HttpTransport, StreamOpen, Transport, TransportRequest,
};

pub const PROVIDER_NAME: &str = "anthropic";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const THINKING_BETA: &str = "interleaved-thinking-2025-05-14";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter.
#[derive(Clone)]
pub struct AnthropicAdapter {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
}

impl AnthropicAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.timeout));
        Self { config, transport }
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn from_env() -> Result<Self> {
        let config =
            ProviderConfig::from_env("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL", DEFAULT_BASE_URL)?;
        Ok(Self::new(config))
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn transport_request(&self, body: Value, wants_thinking_beta: bool) -> TransportRequest {
        let mut request = TransportRequest::new(self.endpoint(), body)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        if wants_thinking_beta {
            request = request.header("anthropic-beta", THINKING_BETA);
        }
        request
    }

    /// Build the wire body. Returns the body, whether the thinking beta
    /// header is needed, and any translation warnings.
    fn build_body(&self, request: &Request, stream: bool) -> (Value, bool, Vec<String>) {
        let mut warnings = Vec::new();
        let mut needs_thinking_beta = false;

        let merged = merge_consecutive_same_role(&request.messages);

        // System and developer messages lift into the top-level block list.
        let mut system_blocks: Vec<Value> = Vec::new();
        let mut wire_messages: Vec<Value> = Vec::new();

        for message in &merged {
            match message.role {
                Role::System | Role::Developer => {
                    system_blocks.push(json!({
                        "type": "text",
                        "text": message.text(),
                    }));
                }
                Role::User | Role::Tool => {
                    let blocks =
                        convert_parts(&message.content, &mut warnings, &mut needs_thinking_beta);
                    if !blocks.is_empty() {
                        wire_messages.push(json!({"role": "user", "content": blocks}));
                    }
                }
                Role::Assistant => {
                    let blocks =
                        convert_parts(&message.content, &mut warnings, &mut needs_thinking_beta);
                    if !blocks.is_empty() {
                        wire_messages.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
            }
        }

        let auto_cache = request
            .options_for(PROVIDER_NAME)
            .and_then(|options| options.get("auto_cache"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if auto_cache {
            if let Some(Value::Object(last)) = system_blocks.last_mut() {
                last.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
            }
        }

        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert("messages".to_string(), Value::Array(wire_messages));
        body.insert(
            "max_tokens".to_string(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if !system_blocks.is_empty() {
            body.insert("system".to_string(), Value::Array(system_blocks));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if !request.stop_sequences.is_empty() {
            body.insert("stop_sequences".to_string(), json!(request.stop_sequences));
        }
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }

        // Tools are omitted entirely for tool_choice none.
        if !request.tools.is_empty() && request.tool_choice != ToolChoice::None {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".to_string(), Value::Array(tools));
            let choice = match &request.tool_choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Named(name) => json!({"type": "tool", "name": name}),
                ToolChoice::None => unreachable!("tools omitted for none"),
            };
            body.insert("tool_choice".to_string(), choice);
        }

        if let Some(effort) = request.reasoning_effort {
            if let Some(budget) = thinking_budget(effort) {
                body.insert(
                    "thinking".to_string(),
                    json!({"type": "enabled", "budget_tokens": budget}),
                );
                needs_thinking_beta = true;
            }
        }

        match &request.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json | ResponseFormat::JsonSchema { .. } => {
                warnings.push(
                    "anthropic has no native JSON response format; use the tool strategy"
                        .to_string(),
                );
            }
        }

        merge_provider_options(&mut body, request, PROVIDER_NAME);
        // Consumed by the adapter, not a wire field.
        body.remove("auto_cache");

        (Value::Object(body), needs_thinking_beta, warnings)
    }

    fn parse_response(
        &self,
        wire: WireResponse,
        rate_limit: Option<RateLimitInfo>,
        warnings: Vec<String>,
        raw: Value,
    ) -> Response {
        let mut parts = Vec::new();
        for block in wire.content {
            match block {
                WireContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
                WireContentBlock::ToolUse { id, name, input } => {
                    parts.push(ContentPart::ToolCall {
                        id,
                        name,
                        arguments: ToolArguments::Json(input),
                    });
                }
                WireContentBlock::Thinking {
                    thinking,
                    signature,
                } => parts.push(ContentPart::Thinking {
                    text: thinking,
                    signature,
                }),
                WireContentBlock::RedactedThinking { data } => {
                    parts.push(ContentPart::RedactedThinking { data });
                }
                WireContentBlock::Other => {}
            }
        }

        let finish_reason_raw = wire.stop_reason.clone();
        Response {
            id: wire.id,
            model: wire.model,
            provider: PROVIDER_NAME.to_string(),
            message: Message::new(Role::Assistant, parts),
            finish_reason: map_stop_reason(wire.stop_reason.as_deref()),
            finish_reason_raw,
            usage: wire.usage.map(|usage| usage.into_usage()).unwrap_or_default(),
            rate_limit,
            warnings,
            raw: Some(raw),
        }
    }
}

fn thinking_budget(effort: ReasoningEffort) -> Option<u32> {
    match effort {
        ReasoningEffort::None => None,
        ReasoningEffort::Low => Some(1024),
        ReasoningEffort::Medium => Some(4096),
        ReasoningEffort::High => Some(16384),
    }
}

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        None => FinishReason::Other,
        Some(_) => FinishReason::Other,
    }
}

fn convert_parts(
    parts: &[ContentPart],
    warnings: &mut Vec<String>,
    needs_thinking_beta: &mut bool,
) -> Vec<Value> {
    let mut blocks = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => blocks.push(json!({"type": "text", "text": text})),
            ContentPart::Image { source } => {
                let source = match source {
                    ImageSource::Url { url } => json!({"type": "url", "url": url}),
                    ImageSource::Base64 { media_type, data } => {
                        json!({"type": "base64", "media_type": media_type, "data": data})
                    }
                };
                blocks.push(json!({"type": "image", "source": source}));
            }
            ContentPart::Document { media_type, data } => {
                blocks.push(json!({
                    "type": "document",
                    "source": {"type": "base64", "media_type": media_type, "data": data},
                }));
            }
            ContentPart::Audio { .. } => {
                warnings.push("anthropic does not accept audio input; part dropped".to_string());
            }
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments.parsed(),
                }));
            }
            ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                });
                if *is_error {
                    block["is_error"] = Value::Bool(true);
                }
                blocks.push(block);
            }
            ContentPart::Thinking { text, signature } => {
                *needs_thinking_beta = true;
                let mut block = json!({"type": "thinking", "thinking": text});
                if let Some(signature) = signature {
                    block["signature"] = json!(signature);
                }
                blocks.push(block);
            }
            ContentPart::RedactedThinking { data } => {
                *needs_thinking_beta = true;
                blocks.push(json!({"type": "redacted_thinking", "data": data}));
            }
        }
    }
    blocks
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let (body, needs_beta, warnings) = self.build_body(request, false);
        tracing::debug!(model = %request.model, "anthropic complete");

        let response = self
            .transport
            .request(self.transport_request(body, needs_beta))
            .await?;

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
        Ok(self.parse_response(wire, rate_limit, warnings, raw))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        let (body, needs_beta, warnings) = self.build_body(request, true);
        tracing::debug!(model = %request.model, "anthropic stream");

        let open = self
            .transport
            .stream(self.transport_request(body, needs_beta))
            .await?;

        let (headers, mut frames) = match open {
            StreamOpen::Failure {
                status,
                headers: _,
                body,
            } => {
                let message = error_message_from_body(&body);
                return Err(error_from_status(status, message, PROVIDER_NAME));
            }
            StreamOpen::Events {
                frames, headers, ..
            } => (headers, frames),
        };

        let rate_limit = parse_rate_limit(&headers);
        let stream = try_stream! {
            let mut assembler = MessageAssembler::new(rate_limit, warnings);

            while let Some(frame) = frames.next().await {
                let frame = frame?;
                // Unparseable SSE payloads are skipped silently.
                let Ok(payload) = serde_json::from_str::<Value>(&frame.data) else {
                    continue;
                };

                match frame.event.as_str() {
                    "message_start" => {
                        assembler.on_message_start(&payload);
                        yield StreamEvent::StreamStart {
                            id: assembler.id.clone(),
                            model: assembler.model.clone(),
                        };
                    }
                    "content_block_start" => {
                        if let Some(event) = assembler.on_block_start(&payload) {
                            yield event;
                        }
                    }
                    "content_block_delta" => {
                        if let Some(event) = assembler.on_block_delta(&payload) {
                            yield event;
                        }
                    }
                    "content_block_stop" => {
                        if let Some(event) = assembler.on_block_stop(&payload) {
                            yield event;
                        }
                    }
                    "message_delta" => {
                        assembler.on_message_delta(&payload);
                    }
                    "message_stop" => {
                        let response = assembler.finish();
                        yield StreamEvent::Finish { response };
                        return;
                    }
                    "error" => {
                        let message = payload
                            .pointer("/error/message")
                            .and_then(Value::as_str)
                            .unwrap_or("provider stream error")
                            .to_string();
                        yield StreamEvent::Error { message };
                        return;
                    }
                    "ping" => {}
                    _ => {
                        yield StreamEvent::Provider {
                            provider: PROVIDER_NAME.to_string(),
                            payload,
                        };
                    }
                }
            }

            Err(LlmError::Stream(
                "anthropic stream ended without message_stop".to_string(),
            ))?;
        };

        Ok(Box::pin(stream))
    }
}

/// Per-stream assembly state: one entry per content block index.
struct MessageAssembler {
    id: Option<String>,
    model: Option<String>,
    blocks: Vec<BlockState>,
    usage: Usage,
    stop_reason: Option<String>,
    rate_limit: Option<RateLimitInfo>,
    warnings: Vec<String>,
}

enum BlockState {
    Text(String),
    Thinking { text: String, signature: Option<String> },
    ToolUse { id: String, name: String, json: String },
}

impl MessageAssembler {
    fn new(rate_limit: Option<RateLimitInfo>, warnings: Vec<String>) -> Self {
        Self {
            id: None,
            model: None,
            blocks: Vec::new(),
            usage: Usage::default(),
            stop_reason: None,
            rate_limit,
            warnings,
        }
    }

    fn on_message_start(&mut self, payload: &Value) {
        self.id = payload
            .pointer("/message/id")
            .and_then(Value::as_str)
            .map(String::from);
        self.model = payload
            .pointer("/message/model")
            .and_then(Value::as_str)
            .map(String::from);
        if let Some(input) = payload
            .pointer("/message/usage/input_tokens")
            .and_then(Value::as_u64)
        {
            self.usage.input_tokens = input;
        }
        if let Some(cache_read) = payload
            .pointer("/message/usage/cache_read_input_tokens")
            .and_then(Value::as_u64)
        {
            self.usage.cache_read_tokens = Some(cache_read);
        }
        if let Some(cache_write) = payload
            .pointer("/message/usage/cache_creation_input_tokens")
            .and_then(Value::as_u64)
        {
            self.usage.cache_write_tokens = Some(cache_write);
        }
    }

    fn on_block_start(&mut self, payload: &Value) -> Option<StreamEvent> {
        let index = self.blocks.len();
        let kind = payload.pointer("/content_block/type").and_then(Value::as_str)?;
        match kind {
            "text" => {
                self.blocks.push(BlockState::Text(String::new()));
                Some(StreamEvent::TextStart { index })
            }
            "thinking" => {
                self.blocks.push(BlockState::Thinking {
                    text: String::new(),
                    signature: None,
                });
                Some(StreamEvent::ReasoningStart { index })
            }
            "tool_use" => {
                let id = payload
                    .pointer("/content_block/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = payload
                    .pointer("/content_block/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.blocks.push(BlockState::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    json: String::new(),
                });
                Some(StreamEvent::ToolCallStart { index, id, name })
            }
            _ => None,
        }
    }

    fn on_block_delta(&mut self, payload: &Value) -> Option<StreamEvent> {
        let index = self.blocks.len().checked_sub(1)?;
        let delta_kind = payload.pointer("/delta/type").and_then(Value::as_str)?;
        match (delta_kind, self.blocks.last_mut()?) {
            ("text_delta", BlockState::Text(text)) => {
                let delta = payload
                    .pointer("/delta/text")
                    .and_then(Value::as_str)?
                    .to_string();
                text.push_str(&delta);
                Some(StreamEvent::TextDelta { index, delta })
            }
            ("thinking_delta", BlockState::Thinking { text, .. }) => {
                let delta = payload
                    .pointer("/delta/thinking")
                    .and_then(Value::as_str)?
                    .to_string();
                text.push_str(&delta);
                Some(StreamEvent::ReasoningDelta { index, delta })
            }
            ("signature_delta", BlockState::Thinking { signature, .. }) => {
                let delta = payload.pointer("/delta/signature").and_then(Value::as_str)?;
                match signature {
                    Some(existing) => existing.push_str(delta),
                    None => *signature = Some(delta.to_string()),
                }
                None
            }
            ("input_json_delta", BlockState::ToolUse { json, .. }) => {
                let delta = payload
                    .pointer("/delta/partial_json")
                    .and_then(Value::as_str)?
                    .to_string();
                json.push_str(&delta);
                Some(StreamEvent::ToolCallDelta {
                    index,
                    arguments_delta: delta,
                })
            }
            _ => None,
        }
    }

    fn on_block_stop(&mut self, _payload: &Value) -> Option<StreamEvent> {
        let index = self.blocks.len().checked_sub(1)?;
        match self.blocks.last()? {
            BlockState::Text(_) => Some(StreamEvent::TextEnd { index }),
            BlockState::Thinking { .. } => Some(StreamEvent::ReasoningEnd { index }),
            BlockState::ToolUse { .. } => Some(StreamEvent::ToolCallEnd { index }),
        }
    }

    fn on_message_delta(&mut self, payload: &Value) {
        if let Some(stop) = payload
            .pointer("/delta/stop_reason")
            .and_then(Value::as_str)
        {
            self.stop_reason = Some(stop.to_string());
        }
        if let Some(output) = payload
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
        {
            self.usage.output_tokens = output;
        }
    }

    fn finish(self) -> Response {
        let mut parts = Vec::new();
        for block in self.blocks {
            match block {
                BlockState::Text(text) => parts.push(ContentPart::Text { text }),
                BlockState::Thinking { text, signature } => {
                    parts.push(ContentPart::Thinking { text, signature });
                }
                BlockState::ToolUse { id, name, json } => {
                    // Accumulated fragments may be empty or malformed; an
                    // empty object is the documented fallback.
                    let arguments: Value =
                        serde_json::from_str(&json).unwrap_or_else(|_| json!({}));
                    parts.push(ContentPart::ToolCall {
                        id,
                        name,
                        arguments: ToolArguments::Json(arguments),
                    });
                }
            }
        }

        let mut usage = self.usage;
        usage.total_tokens = usage.input_tokens + usage.output_tokens;

        Response {
            id: self.id.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            provider: PROVIDER_NAME.to_string(),
            message: Message::new(Role::Assistant, parts),
            finish_reason: map_stop_reason(self.stop_reason.as_deref()),
            finish_reason_raw: self.stop_reason,
            usage,
            rate_limit: self.rate_limit,
            warnings: self.warnings,
            raw: None,
        }
    }
}

// Wire types for the blocking response.

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    #[serde(rename = "redacted_thinking")]
    RedactedThinking { data: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            reasoning_tokens: None,
            cache_read_tokens: self.cache_read_input_tokens,
            cache_write_tokens: self.cache_creation_input_tokens,
        }
    }
}
