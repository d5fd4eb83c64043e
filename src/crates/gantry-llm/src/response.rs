//! The unified response type: assistant message, finish reason, usage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, ToolCallView};

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            reasoning_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
        }
    }

    /// Element-wise sum; optional counters sum when either side is present.
    pub fn add(&self, other: &Usage) -> Usage {
        fn opt_sum(a: Option<u64>, b: Option<u64>) -> Option<u64> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            reasoning_tokens: opt_sum(self.reasoning_tokens, other.reasoning_tokens),
            cache_read_tokens: opt_sum(self.cache_read_tokens, other.cache_read_tokens),
            cache_write_tokens: opt_sum(self.cache_write_tokens, other.cache_write_tokens),
        }
    }
}

/// Rate-limit state parsed from response headers, when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub requests_limit: Option<u64>,
    pub requests_remaining: Option<u64>,
    pub tokens_limit: Option<u64>,
    pub tokens_remaining: Option<u64>,
    /// Provider-reported reset marker, verbatim.
    pub reset: Option<String>,
}

impl RateLimitInfo {
    pub fn is_empty(&self) -> bool {
        self.requests_limit.is_none()
            && self.requests_remaining.is_none()
            && self.tokens_limit.is_none()
            && self.tokens_remaining.is_none()
            && self.reset.is_none()
    }
}

/// A completed provider call.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub message: Message,
    pub finish_reason: FinishReason,
    /// The provider's own stop-reason string, untranslated.
    pub finish_reason_raw: Option<String>,
    pub usage: Usage,
    pub rate_limit: Option<RateLimitInfo>,
    pub warnings: Vec<String>,
    /// The raw response envelope, for callers that need provider extras.
    pub raw: Option<Value>,
}

impl Response {
    /// Concatenated text of the assistant message.
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallView> {
        self.message.tool_calls()
    }
}
