//! Provider adapters.
//!
//! Each adapter translates unified requests to its provider's wire format
//! and parses blocking and streaming responses back. Rules every adapter
//! follows:
//!
//! - Consecutive same-role messages are merged before translation.
//! - Unparseable SSE JSON lines are silently skipped.
//! - Non-2xx responses (blocking or at stream open) are classified through
//!   [`crate::error::error_from_status`] with the drained body message.
//! - Rate-limit headers are parsed into `RateLimitInfo` when present.
//! - `provider_options[<name>]` entries are merged into the wire body after
//!   all deterministic fields and never overwrite a field the adapter set.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::request::Request;
use crate::response::{RateLimitInfo, Response};
use crate::stream::EventStream;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// A provider behind the unified contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name used for registry routing and error context.
    fn name(&self) -> &'static str;

    /// Whether the provider natively honors a JSON-schema response format.
    /// Structured output falls back to a forced tool call when it does not.
    fn supports_json_schema(&self) -> bool {
        false
    }

    /// Execute a blocking completion.
    async fn complete(&self, request: &Request) -> Result<Response>;

    /// Execute a streaming completion.
    async fn stream(&self, request: &Request) -> Result<EventStream>;
}

/// Merge the request's option bag for `provider` into a wire body.
///
/// Only fills keys the adapter did not set; deterministic translation
/// always wins over pass-through options.
pub(crate) fn merge_provider_options(
    body: &mut serde_json::Map<String, Value>,
    request: &Request,
    provider: &str,
) {
    if let Some(options) = request.options_for(provider) {
        for (key, value) in options {
            if !body.contains_key(key) {
                body.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Parse rate-limit headers into a `RateLimitInfo`, if any are present.
///
/// Understands the `x-ratelimit-*` family and Anthropic's
/// `anthropic-ratelimit-*` family; header names must already be lowercase.
pub(crate) fn parse_rate_limit(headers: &HashMap<String, String>) -> Option<RateLimitInfo> {
    fn get_u64(headers: &HashMap<String, String>, names: &[&str]) -> Option<u64> {
        names
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|value| value.parse().ok())
    }

    let info = RateLimitInfo {
        requests_limit: get_u64(
            headers,
            &[
                "x-ratelimit-limit-requests",
                "anthropic-ratelimit-requests-limit",
            ],
        ),
        requests_remaining: get_u64(
            headers,
            &[
                "x-ratelimit-remaining-requests",
                "anthropic-ratelimit-requests-remaining",
            ],
        ),
        tokens_limit: get_u64(
            headers,
            &[
                "x-ratelimit-limit-tokens",
                "anthropic-ratelimit-tokens-limit",
            ],
        ),
        tokens_remaining: get_u64(
            headers,
            &[
                "x-ratelimit-remaining-tokens",
                "anthropic-ratelimit-tokens-remaining",
            ],
        ),
        reset: headers
            .get("x-ratelimit-reset-requests")
            .or_else(|| headers.get("anthropic-ratelimit-requests-reset"))
            .or_else(|| headers.get("retry-after"))
            .cloned(),
    };

    if info.is_empty() {
        None
    } else {
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    #[test]
    fn provider_options_never_overwrite_adapter_fields() {
        let request = Request::new("m", vec![Message::user("hi")])
            .with_provider_option("anthropic", "max_tokens", json!(1))
            .with_provider_option("anthropic", "top_k", json!(40));

        let mut body = serde_json::Map::new();
        body.insert("max_tokens".to_string(), json!(4096));

        merge_provider_options(&mut body, &request, "anthropic");

        assert_eq!(body["max_tokens"], json!(4096));
        assert_eq!(body["top_k"], json!(40));
    }

    #[test]
    fn rate_limit_headers_both_families() {
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-remaining-requests".to_string(), "42".to_string());
        headers.insert(
            "anthropic-ratelimit-tokens-limit".to_string(),
            "100000".to_string(),
        );
        let info = parse_rate_limit(&headers).unwrap();
        assert_eq!(info.requests_remaining, Some(42));
        assert_eq!(info.tokens_limit, Some(100000));

        assert!(parse_rate_limit(&HashMap::new()).is_none());
    }
}
