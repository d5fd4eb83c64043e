//! # gantry-llm - Unified LLM Core
//!
//! One request/response/streaming contract over heterogeneous LLM
//! providers, plus a high-level generate API with a bounded tool-call
//! loop and structured output.
//!
//! ## Overview
//!
//! - **Message algebra** - typed roles and an eight-variant content-part
//!   sum ([`Message`], [`ContentPart`]); thinking payloads stay opaque.
//! - **Provider adapters** - Anthropic Messages, OpenAI Responses, and
//!   Google Gemini Contents wire formats behind one [`ProviderAdapter`]
//!   trait, for both blocking and SSE-streaming calls.
//! - **Unified client** - a [`Client`] registry routes requests by
//!   provider name, runs middleware chains, and detects credentials from
//!   the environment via [`Client::from_env`].
//! - **Generate API** - [`generate`] drives the tool-call loop,
//!   [`generate_object`] enforces JSON-schema output, and
//!   [`stream_text::stream`] exposes a multi-consumer replayable stream.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gantry_llm::{generate, Client, GenerateOptions};
//!
//! #[tokio::main]
//! async fn main() -> gantry_llm::Result<()> {
//!     let client = Client::from_env();
//!     let result = generate(
//!         &client,
//!         GenerateOptions::new("claude-sonnet-4-20250514")
//!             .with_system("You are terse.")
//!             .with_prompt("Name one prime number."),
//!     )
//!     .await?;
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```
//!
//! Adapters never retry and hold no cross-request state; retry policy and
//! conversation state are the caller's. Transport is abstracted behind
//! [`transport::Transport`] so tests run against scripted exchanges.

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod generate_object;
pub mod message;
pub mod middleware;
pub mod provider;
pub mod request;
pub mod response;
pub mod stream;
pub mod stream_text;
pub mod tools;
pub mod transport;

// Re-export main types
pub use cancel::{run_bounded, CancellationToken};
pub use client::Client;
pub use config::ProviderConfig;
pub use error::{error_from_status, LlmError, Result};
pub use generate::{
    generate, GenerateOptions, GenerateResult, StepResult, ToolResultRecord,
    DEFAULT_MAX_TOOL_ROUNDS,
};
pub use generate_object::{generate_object, ObjectOptions, ObjectResult};
pub use message::{
    merge_consecutive_same_role, ContentPart, ImageSource, Message, Role, ToolArguments,
    ToolCallView,
};
pub use middleware::{Middleware, TracingMiddleware};
pub use provider::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter, ProviderAdapter};
pub use request::{ReasoningEffort, Request, ResponseFormat};
pub use response::{FinishReason, RateLimitInfo, Response, Usage};
pub use stream::{collect_response, EventStream, StreamEvent};
pub use stream_text::{stream, StreamHandle};
pub use tools::{Tool, ToolChoice, ToolDefinition};
