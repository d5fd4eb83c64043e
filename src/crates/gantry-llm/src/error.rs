//! Error types for the unified LLM core.
//!
//! Every failure surfaced by this crate is an [`LlmError`]. The taxonomy
//! distinguishes caller mistakes (`Configuration`), provider rejections
//! (`Authentication`, `AccessDenied`, `NotFound`, `InvalidRequest`,
//! `ContentFilter`, `ContextLength`), transient conditions (`RateLimited`,
//! `Server`, `Network`), cancellation (`RequestTimeout`, `Aborted`), and
//! extraction failures (`Stream`, `ToolCall`, `NoObjectGenerated`).
//!
//! Adapters never retry internally; [`LlmError::is_retryable`] tells the
//! caller whether a retry could succeed.

use std::time::Duration;

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when working with LLM providers.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Malformed caller options (e.g. both `prompt` and `messages`,
    /// unknown provider, no default provider).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// API authentication failed (401).
    #[error("authentication failed ({provider}): {message}")]
    Authentication { provider: String, message: String },

    /// Access denied (403).
    #[error("access denied ({provider}): {message}")]
    AccessDenied { provider: String, message: String },

    /// Model or endpoint not found (404).
    #[error("not found ({provider}): {message}")]
    NotFound { provider: String, message: String },

    /// Provider rejected the request as invalid (400/422).
    #[error("invalid request ({provider}): {message}")]
    InvalidRequest { provider: String, message: String },

    /// Rate limit exceeded (429).
    #[error("rate limited ({provider}): {message}")]
    RateLimited {
        provider: String,
        message: String,
        /// Parsed `retry-after` hint, when the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Provider-side server error (5xx).
    #[error("server error ({provider}, status {status}): {message}")]
    Server {
        provider: String,
        status: u16,
        message: String,
    },

    /// Transport-level failure (connection refused, DNS, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// Provider-signaled safety block.
    #[error("content filtered ({provider}): {message}")]
    ContentFilter { provider: String, message: String },

    /// Prompt exceeds the model's context window.
    #[error("context length exceeded ({provider}): {message}")]
    ContextLength { provider: String, message: String },

    /// The caller's total timeout elapsed.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The caller's abort signal tripped.
    #[error("request aborted")]
    Aborted,

    /// Malformed stream frame, or a stream that ended without a
    /// terminal response.
    #[error("stream error: {0}")]
    Stream(String),

    /// Tool invocation failed in a way the tool loop could not absorb.
    #[error("tool call error: {0}")]
    ToolCall(String),

    /// Structured-output extraction failed.
    #[error("no object generated: {0}")]
    NoObjectGenerated(String),

    /// Failed to serialize or deserialize a wire payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Provider error that fits no narrower category.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// Generic error with context.
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Check if this error is retryable.
    ///
    /// Rate limits, server errors, network failures, and timeouts are
    /// transient; everything else reflects a condition a retry will not
    /// change. The retry policy itself is caller-owned.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Server { .. }
                | LlmError::Network(_)
                | LlmError::RequestTimeout(_)
        )
    }

    /// Parsed `retry-after` hint, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

/// Classify an HTTP error status into a typed [`LlmError`].
///
/// The body message is inspected for well-known markers ("context length",
/// "content filter", "not found") so that providers which report these
/// conditions under generic statuses still land in the right category.
pub fn error_from_status(
    status: u16,
    message: impl Into<String>,
    provider: impl Into<String>,
) -> LlmError {
    let message = message.into();
    let provider = provider.into();
    let lowered = message.to_lowercase();

    if lowered.contains("context length")
        || lowered.contains("context window")
        || lowered.contains("maximum context")
        || status == 413
    {
        return LlmError::ContextLength { provider, message };
    }
    if lowered.contains("content filter")
        || lowered.contains("content_filter")
        || lowered.contains("safety")
    {
        return LlmError::ContentFilter { provider, message };
    }

    match status {
        401 => LlmError::Authentication { provider, message },
        403 => LlmError::AccessDenied { provider, message },
        404 => LlmError::NotFound { provider, message },
        400 | 422 => {
            if lowered.contains("not found") {
                LlmError::NotFound { provider, message }
            } else {
                LlmError::InvalidRequest { provider, message }
            }
        }
        429 => LlmError::RateLimited {
            provider,
            message,
            retry_after: None,
        },
        500..=599 => LlmError::Server {
            provider,
            status,
            message,
        },
        _ => LlmError::Provider { provider, message },
    }
}
