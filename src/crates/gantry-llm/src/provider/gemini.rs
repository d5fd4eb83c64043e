//! Google Gemini Contents-style adapter.
//!
//! Translation contract:
//! - system messages lift into `systemInstruction.parts`; the conversation
//!   uses `contents` with roles `user` / `model`.
//! - tool calls are `functionCall` parts; tool results are
//!   `functionResponse` parts whose function name is resolved from an
//!   id→name map built while translating the model's output (the provider
//!   does not emit call ids, so this adapter generates UUIDs locally).
//! - thinking round-trips as `{text, thought: true}` parts.
//! - `tool_choice`: auto omits `toolConfig` entirely; required → `ANY`,
//!   named → `ANY` + `allowedFunctionNames`.
//! - generation knobs nest under `generationConfig`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_stream::try_stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::ProviderConfig;
use crate::error::{error_from_status, Result};
use crate::message::{merge_consecutive_same_role, ContentPart, ImageSource, Message, Role, ToolArguments};
use crate::provider::{merge_provider_options, parse_rate_limit, ProviderAdapter};
use crate::request::{ReasoningEffort, Request, ResponseFormat};
use crate::response::{FinishReason, RateLimitInfo, Response, Usage};
use crate::stream::{EventStream, StreamEvent};
use crate::tools::ToolChoice;
use crate::transport::{
    error_message_from_body, HttpTransport, StreamOpen, Transport, TransportRequest,
};

pub const PROVIDER_NAME: &str = "gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API adapter.
#[derive(Clone)]
pub struct GeminiAdapter {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
    /// Synthetic tool-call id → function name, filled during output
    /// translation and consulted when sending function responses back.
    call_names: Arc<Mutex<HashMap<String, String>>>,
}

impl GeminiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.timeout));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            call_names: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_env() -> Result<Self> {
        let config = ProviderConfig::from_env("GEMINI_API_KEY", "GEMINI_BASE_URL", DEFAULT_BASE_URL)
            .or_else(|_| {
                ProviderConfig::from_env("GOOGLE_API_KEY", "GEMINI_BASE_URL", DEFAULT_BASE_URL)
            })?;
        Ok(Self::new(config))
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let verb = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            verb
        )
    }

    fn transport_request(&self, model: &str, stream: bool, body: Value) -> TransportRequest {
        let mut request = TransportRequest::new(self.endpoint(model, stream), body)
            .header("content-type", "application/json")
            .query_param("key", &self.config.api_key);
        if stream {
            request = request.query_param("alt", "sse");
        }
        request
    }

    fn remember_call(&self, id: &str, name: &str) {
        self.call_names
            .lock()
            .unwrap()
            .insert(id.to_string(), name.to_string());
    }

    fn name_for_call(&self, id: &str) -> Option<String> {
        self.call_names.lock().unwrap().get(id).cloned()
    }

    fn build_body(&self, request: &Request) -> (Value, Vec<String>) {
        let mut warnings = Vec::new();
        let merged = merge_consecutive_same_role(&request.messages);

        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for message in &merged {
            match message.role {
                Role::System | Role::Developer => {
                    system_parts.push(json!({"text": message.text()}));
                }
                Role::User | Role::Tool => {
                    let parts = self.convert_parts(&message.content, &mut warnings);
                    if !parts.is_empty() {
                        contents.push(json!({"role": "user", "parts": parts}));
                    }
                }
                Role::Assistant => {
                    let parts = self.convert_parts(&message.content, &mut warnings);
                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("contents".to_string(), Value::Array(contents));
        if !system_parts.is_empty() {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": system_parts}),
            );
        }

        let mut generation = Map::new();
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            generation.insert("topP".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !request.stop_sequences.is_empty() {
            generation.insert("stopSequences".to_string(), json!(request.stop_sequences));
        }
        match &request.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json => {
                generation.insert("responseMimeType".to_string(), json!("application/json"));
            }
            ResponseFormat::JsonSchema { schema, .. } => {
                generation.insert("responseMimeType".to_string(), json!("application/json"));
                generation.insert("responseSchema".to_string(), schema.clone());
            }
        }
        if let Some(effort) = request.reasoning_effort {
            if let Some(budget) = thinking_budget(effort) {
                generation.insert(
                    "thinkingConfig".to_string(),
                    json!({"thinkingBudget": budget}),
                );
            }
        }
        if !generation.is_empty() {
            body.insert("generationConfig".to_string(), Value::Object(generation));
        }

        if !request.tools.is_empty() && request.tool_choice != ToolChoice::None {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );

            // Auto omits toolConfig entirely.
            let mode = match &request.tool_choice {
                ToolChoice::Auto => None,
                ToolChoice::Required => Some(json!({"mode": "ANY"})),
                ToolChoice::Named(name) => {
                    Some(json!({"mode": "ANY", "allowedFunctionNames": [name]}))
                }
                ToolChoice::None => unreachable!("tools omitted for none"),
            };
            if let Some(config) = mode {
                body.insert(
                    "toolConfig".to_string(),
                    json!({"functionCallingConfig": config}),
                );
            }
        }

        merge_provider_options(&mut body, request, PROVIDER_NAME);
        (Value::Object(body), warnings)
    }

    fn convert_parts(&self, parts: &[ContentPart], warnings: &mut Vec<String>) -> Vec<Value> {
        let mut converted = Vec::new();
        for part in parts {
            match part {
                ContentPart::Text { text } => converted.push(json!({"text": text})),
                ContentPart::Image { source } => match source {
                    ImageSource::Base64 { media_type, data } => {
                        converted.push(json!({
                            "inlineData": {"mimeType": media_type, "data": data}
                        }));
                    }
                    ImageSource::Url { url } => {
                        converted.push(json!({"fileData": {"fileUri": url}}));
                    }
                },
                ContentPart::Document { media_type, data } => {
                    converted.push(json!({
                        "inlineData": {"mimeType": media_type, "data": data}
                    }));
                }
                ContentPart::Audio { media_type, data } => {
                    converted.push(json!({
                        "inlineData": {"mimeType": media_type, "data": data}
                    }));
                }
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    self.remember_call(id, name);
                    converted.push(json!({
                        "functionCall": {"name": name, "args": arguments.parsed()}
                    }));
                }
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => {
                    let Some(name) = self.name_for_call(tool_call_id) else {
                        warnings.push(format!(
                            "dropping tool result for unknown call id {tool_call_id}"
                        ));
                        continue;
                    };
                    let payload = if *is_error {
                        json!({"error": content})
                    } else {
                        json!({"result": content})
                    };
                    converted.push(json!({
                        "functionResponse": {"name": name, "response": payload}
                    }));
                }
                ContentPart::Thinking { text, .. } => {
                    converted.push(json!({"text": text, "thought": true}));
                }
                ContentPart::RedactedThinking { .. } => {
                    warnings.push("gemini cannot round-trip redacted thinking; part dropped".into());
                }
            }
        }
        converted
    }

    fn parse_candidate(
        &self,
        wire: WireResponse,
    ) -> (Vec<ContentPart>, FinishReason, Option<String>, Usage) {
        let mut parts = Vec::new();
        let mut saw_tool_call = false;
        let mut finish_raw = None;

        if let Some(candidate) = wire.candidates.into_iter().next() {
            finish_raw = candidate.finish_reason;
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(call) = part.function_call {
                        saw_tool_call = true;
                        let id = format!("call_{}", uuid::Uuid::new_v4());
                        self.remember_call(&id, &call.name);
                        parts.push(ContentPart::ToolCall {
                            id,
                            name: call.name,
                            arguments: ToolArguments::Json(call.args.unwrap_or(Value::Null)),
                        });
                    } else if let Some(text) = part.text {
                        if part.thought.unwrap_or(false) {
                            parts.push(ContentPart::Thinking {
                                text,
                                signature: None,
                            });
                        } else {
                            parts.push(ContentPart::Text { text });
                        }
                    }
                }
            }
        }

        let finish_reason = if saw_tool_call {
            FinishReason::ToolCalls
        } else {
            map_finish_reason(finish_raw.as_deref())
        };

        let usage = wire
            .usage_metadata
            .map(|usage| Usage {
                input_tokens: usage.prompt_token_count.unwrap_or(0),
                output_tokens: usage.candidates_token_count.unwrap_or(0),
                total_tokens: usage.total_token_count.unwrap_or(0),
                reasoning_tokens: usage.thoughts_token_count,
                cache_read_tokens: usage.cached_content_token_count,
                cache_write_tokens: None,
            })
            .unwrap_or_default();

        (parts, finish_reason, finish_raw, usage)
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

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
        None => FinishReason::Other,
        Some(_) => FinishReason::Other,
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports_json_schema(&self) -> bool {
        true
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let (body, warnings) = self.build_body(request);
        tracing::debug!(model = %request.model, "gemini complete");

        let response = self
            .transport
            .request(self.transport_request(&request.model, false, body))
            .await?;
        let rate_limit = parse_rate_limit(&response.headers);

        if !response.is_success() {
            let message = error_message_from_body(&response.body);
            return Err(error_from_status(response.status, message, PROVIDER_NAME));
        }

        let raw: Value = serde_json::from_str(&response.body)?;
        let wire: WireResponse = serde_json::from_str(&response.body)?;
        let (parts, finish_reason, finish_raw, usage) = self.parse_candidate(wire);

        Ok(Response {
            id: format!("gemini_{}", uuid::Uuid::new_v4()),
            model: request.model.clone(),
            provider: PROVIDER_NAME.to_string(),
            message: Message::new(Role::Assistant, parts),
            finish_reason,
            finish_reason_raw: finish_raw,
            usage,
            rate_limit,
            warnings,
            raw: Some(raw),
        })
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        let (body, warnings) = self.build_body(request);
        tracing::debug!(model = %request.model, "gemini stream");

        let open = self
            .transport
            .stream(self.transport_request(&request.model, true, body))
            .await?;
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
        let model = request.model.clone();

        let stream = try_stream! {
            let mut started = false;
            let mut parts: Vec<ContentPart> = Vec::new();
            let mut text_open = false;
            let mut reasoning_open = false;
            let mut usage = Usage::default();
            let mut finish_raw: Option<String> = None;
            let mut saw_tool_call = false;
            let mut index = 0usize;

            while let Some(frame) = frames.next().await {
                let frame = frame?;
                let Ok(chunk) = serde_json::from_str::<WireResponse>(&frame.data) else {
                    continue;
                };

                if !started {
                    started = true;
                    yield StreamEvent::StreamStart {
                        id: None,
                        model: Some(model.clone()),
                    };
                }

                if let Some(meta) = &chunk.usage_metadata {
                    usage = Usage {
                        input_tokens: meta.prompt_token_count.unwrap_or(0),
                        output_tokens: meta.candidates_token_count.unwrap_or(0),
                        total_tokens: meta.total_token_count.unwrap_or(0),
                        reasoning_tokens: meta.thoughts_token_count,
                        cache_read_tokens: meta.cached_content_token_count,
                        cache_write_tokens: None,
                    };
                }

                let Some(candidate) = chunk.candidates.into_iter().next() else {
                    continue;
                };
                if let Some(reason) = candidate.finish_reason {
                    finish_raw = Some(reason);
                }

                let Some(content) = candidate.content else {
                    continue;
                };
                for part in content.parts {
                    if let Some(call) = part.function_call {
                        if text_open {
                            yield StreamEvent::TextEnd { index };
                            text_open = false;
                            index += 1;
                        }
                        if reasoning_open {
                            yield StreamEvent::ReasoningEnd { index };
                            reasoning_open = false;
                            index += 1;
                        }
                        saw_tool_call = true;
                        let id = format!("call_{}", uuid::Uuid::new_v4());
                        adapter.remember_call(&id, &call.name);
                        let arguments = call.args.unwrap_or(Value::Null);
                        yield StreamEvent::ToolCallStart {
                            index,
                            id: id.clone(),
                            name: call.name.clone(),
                        };
                        yield StreamEvent::ToolCallDelta {
                            index,
                            arguments_delta: arguments.to_string(),
                        };
                        yield StreamEvent::ToolCallEnd { index };
                        index += 1;
                        parts.push(ContentPart::ToolCall {
                            id,
                            name: call.name,
                            arguments: ToolArguments::Json(arguments),
                        });
                    } else if let Some(text) = part.text {
                        let is_thought = part.thought.unwrap_or(false);
                        if is_thought {
                            if text_open {
                                yield StreamEvent::TextEnd { index };
                                text_open = false;
                                index += 1;
                            }
                            if !reasoning_open {
                                reasoning_open = true;
                                yield StreamEvent::ReasoningStart { index };
                                parts.push(ContentPart::Thinking {
                                    text: String::new(),
                                    signature: None,
                                });
                            }
                            yield StreamEvent::ReasoningDelta {
                                index,
                                delta: text.clone(),
                            };
                            if let Some(ContentPart::Thinking { text: existing, .. }) =
                                parts.last_mut()
                            {
                                existing.push_str(&text);
                            }
                        } else {
                            if reasoning_open {
                                yield StreamEvent::ReasoningEnd { index };
                                reasoning_open = false;
                                index += 1;
                            }
                            if !text_open {
                                text_open = true;
                                yield StreamEvent::TextStart { index };
                                parts.push(ContentPart::Text {
                                    text: String::new(),
                                });
                            }
                            yield StreamEvent::TextDelta {
                                index,
                                delta: text.clone(),
                            };
                            if let Some(ContentPart::Text { text: existing }) = parts.last_mut() {
                                existing.push_str(&text);
                            }
                        }
                    }
                }
            }

            if text_open {
                yield StreamEvent::TextEnd { index };
            }
            if reasoning_open {
                yield StreamEvent::ReasoningEnd { index };
            }

            let finish_reason = if saw_tool_call {
                FinishReason::ToolCalls
            } else {
                map_finish_reason(finish_raw.as_deref())
            };

            let response = Response {
                id: format!("gemini_{}", uuid::Uuid::new_v4()),
                model: model.clone(),
                provider: PROVIDER_NAME.to_string(),
                message: Message::new(Role::Assistant, parts),
                finish_reason,
                finish_reason_raw: finish_raw,
                usage,
                rate_limit: rate_limit.clone(),
                warnings: warnings.clone(),
                raw: None,
            };
            yield StreamEvent::Finish { response };
        };

        Ok(Box::pin(stream))
    }
}

// Wire types. Gemini reuses one envelope for blocking and streaming.

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: Option<WireContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    text: Option<String>,
    thought: Option<bool>,
    #[serde(rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
    #[serde(rename = "thoughtsTokenCount")]
    thoughts_token_count: Option<u64>,
    #[serde(rename = "cachedContentTokenCount")]
    cached_content_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use crate::transport::testing::{ScriptedReply, ScriptedTransport};
    use crate::transport::SseFrame;

    fn adapter(transport: Arc<ScriptedTransport>) -> GeminiAdapter {
        GeminiAdapter::with_transport(ProviderConfig::new("test-key", DEFAULT_BASE_URL), transport)
    }

    fn basic_request() -> Request {
        Request::new(
            "gemini-2.5-pro",
            vec![Message::system("be terse"), Message::user("hi")],
        )
    }

    #[test]
    fn system_instruction_and_roles() {
        let adapter = adapter(Arc::new(ScriptedTransport::new(vec![])));
        let request = Request::new(
            "gemini-2.5-pro",
            vec![
                Message::system("be terse"),
                Message::user("hi"),
                Message::assistant("hello"),
            ],
        );
        let (body, _) = adapter.build_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn tool_config_modes() {
        let adapter = adapter(Arc::new(ScriptedTransport::new(vec![])));
        let tools = vec![ToolDefinition::new("f", "desc", json!({"type": "object"}))];

        // auto omits toolConfig entirely.
        let (body, _) = adapter.build_body(&basic_request().with_tools(tools.clone()));
        assert!(body.get("toolConfig").is_none());
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "f"
        );

        let (body, _) = adapter.build_body(
            &basic_request()
                .with_tools(tools.clone())
                .with_tool_choice(ToolChoice::Required),
        );
        assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "ANY");

        let (body, _) = adapter.build_body(
            &basic_request()
                .with_tools(tools)
                .with_tool_choice(ToolChoice::Named("f".into())),
        );
        assert_eq!(
            body["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"],
            json!(["f"])
        );
    }

    #[test]
    fn generation_config_nesting() {
        let adapter = adapter(Arc::new(ScriptedTransport::new(vec![])));
        let request = basic_request()
            .with_temperature(0.5)
            .with_max_tokens(256)
            .with_response_format(ResponseFormat::JsonSchema {
                name: None,
                schema: json!({"type": "object"}),
                strict: None,
            });
        let (body, _) = adapter.build_body(&request);
        let config = &body["generationConfig"];
        assert_eq!(config["temperature"], json!(0.5));
        assert_eq!(config["maxOutputTokens"], json!(256));
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"], json!({"type": "object"}));
    }

    #[test]
    fn function_response_resolves_name_from_call_id() {
        let adapter = adapter(Arc::new(ScriptedTransport::new(vec![])));
        // Simulate translating an earlier model output that assigned an id.
        adapter.remember_call("call_1", "lookup");

        let request = Request::new(
            "gemini-2.5-pro",
            vec![Message::new(
                Role::Tool,
                vec![ContentPart::tool_result("call_1", "42", false)],
            )],
        );
        let (body, warnings) = adapter.build_body(&request);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(part["functionResponse"]["name"], "lookup");
        assert_eq!(part["functionResponse"]["response"]["result"], "42");
        assert!(warnings.is_empty());

        // Unknown ids are dropped with a warning.
        let request = Request::new(
            "gemini-2.5-pro",
            vec![Message::new(
                Role::Tool,
                vec![ContentPart::tool_result("call_unknown", "x", false)],
            )],
        );
        let (_, warnings) = adapter.build_body(&request);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn thought_parts_round_trip() {
        let adapter = adapter(Arc::new(ScriptedTransport::new(vec![])));
        let request = Request::new(
            "gemini-2.5-pro",
            vec![Message::new(
                Role::Assistant,
                vec![ContentPart::Thinking {
                    text: "pondering".into(),
                    signature: None,
                }],
            )],
        );
        let (body, _) = adapter.build_body(&request);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(part["text"], "pondering");
        assert_eq!(part["thought"], true);
    }

    #[tokio::test]
    async fn complete_parses_candidates_and_synthesizes_ids() {
        let transport = Arc::new(ScriptedTransport::ok_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Answer."},
                    {"functionCall": {"name": "lookup", "args": {"q": 1}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 9,
                              "totalTokenCount": 13, "thoughtsTokenCount": 2}
        })));
        let adapter = adapter(transport.clone());
        let response = adapter.complete(&basic_request()).await.unwrap();

        assert_eq!(response.text(), "Answer.");
        // Tool call presence overrides the STOP finish reason.
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let calls = response.tool_calls();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(response.usage.reasoning_tokens, Some(2));

        // The API key travels as a query parameter, not a header.
        let requests = transport.requests.lock().unwrap();
        assert!(requests[0]
            .query
            .iter()
            .any(|(name, value)| name == "key" && value == "test-key"));
    }

    #[tokio::test]
    async fn finish_reason_mapping() {
        for (raw, expected) in [
            ("STOP", FinishReason::Stop),
            ("MAX_TOKENS", FinishReason::Length),
            ("SAFETY", FinishReason::ContentFilter),
            ("RECITATION", FinishReason::ContentFilter),
            ("WEIRD", FinishReason::Other),
        ] {
            let transport = Arc::new(ScriptedTransport::ok_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "t"}]},
                    "finishReason": raw
                }]
            })));
            let adapter = adapter(transport);
            let response = adapter.complete(&basic_request()).await.unwrap();
            assert_eq!(response.finish_reason, expected, "for {raw}");
        }
    }

    fn frame(data: Value) -> SseFrame {
        SseFrame {
            event: String::new(),
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn stream_concatenates_text_chunks() {
        let frames = vec![
            frame(json!({"candidates": [{"content": {"role": "model",
                "parts": [{"text": "Hel"}]}}]})),
            frame(json!({"candidates": [{"content": {"role": "model",
                "parts": [{"text": "lo"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 3,
                                  "totalTokenCount": 5}})),
        ];
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::Frames(frames)]));
        let adapter = adapter(transport);

        let response =
            crate::stream::collect_response(adapter.stream(&basic_request()).await.unwrap())
                .await
                .unwrap();
        assert_eq!(response.text(), "Hello");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn unparseable_sse_lines_are_skipped() {
        let frames = vec![
            SseFrame {
                event: String::new(),
                data: "{not valid json".to_string(),
            },
            frame(json!({"candidates": [{"content": {"role": "model",
                "parts": [{"text": "ok"}]}, "finishReason": "STOP"}]})),
        ];
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::Frames(frames)]));
        let adapter = adapter(transport);
        let response =
            crate::stream::collect_response(adapter.stream(&basic_request()).await.unwrap())
                .await
                .unwrap();
        assert_eq!(response.text(), "ok");
    }
}
