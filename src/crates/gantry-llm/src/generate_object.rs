//! Structured output: `generate_object` enforces a JSON schema.
//!
//! Strategy selection is capability-driven: providers with native JSON
//! schema support get `response_format = json_schema` and the text output
//! is parsed; providers without it (the Messages-style API) get a single
//! mandatory tool whose `input_schema` is the requested schema, and the
//! object is read from the first tool call's arguments. Either way, a
//! parse failure or an absent tool call raises
//! [`LlmError::NoObjectGenerated`] with the cause preserved.

use serde_json::Value;

use crate::client::Client;
use crate::error::{LlmError, Result};
use crate::generate::{generate, GenerateOptions};
use crate::message::ToolArguments;
use crate::request::ResponseFormat;
use crate::response::{Response, Usage};
use crate::tools::{Tool, ToolChoice, ToolDefinition};

/// Name of the synthesized extraction tool for providers without native
/// JSON-schema output.
const EXTRACTION_TOOL: &str = "structured_output";

/// Options for [`generate_object`].
#[derive(Clone)]
pub struct ObjectOptions {
    pub generate: GenerateOptions,
    /// JSON schema the output object must satisfy.
    pub schema: Value,
    pub schema_name: Option<String>,
}

impl ObjectOptions {
    pub fn new(generate: GenerateOptions, schema: Value) -> Self {
        Self {
            generate,
            schema,
            schema_name: None,
        }
    }

    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }
}

/// A successfully extracted object.
#[derive(Debug, Clone)]
pub struct ObjectResult {
    pub object: Value,
    pub response: Response,
    pub usage: Usage,
}

/// Generate output conforming to a JSON schema.
pub async fn generate_object(client: &Client, options: ObjectOptions) -> Result<ObjectResult> {
    // Only the provider choice matters for the probe.
    let probe = options.generate.to_request(Vec::new());
    let adapter = client.adapter_for(&probe)?;

    if adapter.supports_json_schema() {
        native_schema_strategy(client, options).await
    } else {
        forced_tool_strategy(client, options).await
    }
}

async fn native_schema_strategy(client: &Client, options: ObjectOptions) -> Result<ObjectResult> {
    let mut generate_options = options.generate;
    generate_options.response_format = ResponseFormat::JsonSchema {
        name: options.schema_name,
        schema: options.schema,
        strict: Some(true),
    };
    generate_options.tools = Vec::new();
    generate_options.max_tool_rounds = 0;

    let result = generate(client, generate_options).await?;
    let text = result.text.trim().to_string();
    let object: Value = serde_json::from_str(&text).map_err(|error| {
        LlmError::NoObjectGenerated(format!("response text is not valid JSON: {error}"))
    })?;

    Ok(ObjectResult {
        object,
        usage: result.total_usage,
        response: result.response,
    })
}

async fn forced_tool_strategy(client: &Client, options: ObjectOptions) -> Result<ObjectResult> {
    let tool_name = options
        .schema_name
        .clone()
        .unwrap_or_else(|| EXTRACTION_TOOL.to_string());

    let mut generate_options = options.generate;
    generate_options.tools = vec![Tool::passive(ToolDefinition::new(
        tool_name.clone(),
        "Produce the structured output.",
        options.schema,
    ))];
    generate_options.tool_choice = ToolChoice::Named(tool_name.clone());
    generate_options.max_tool_rounds = 0;

    let result = generate(client, generate_options).await?;
    let calls = result.response.tool_calls();
    let call = calls.first().ok_or_else(|| {
        LlmError::NoObjectGenerated(format!(
            "assistant returned no call to '{tool_name}' (finish: {:?})",
            result.finish_reason
        ))
    })?;

    let object = match &call.arguments {
        ToolArguments::Json(value) => value.clone(),
        ToolArguments::Raw(raw) => serde_json::from_str(raw).map_err(|error| {
            LlmError::NoObjectGenerated(format!("tool arguments are not valid JSON: {error}"))
        })?,
    };

    Ok(ObjectResult {
        object,
        usage: result.total_usage,
        response: result.response,
    })
}
