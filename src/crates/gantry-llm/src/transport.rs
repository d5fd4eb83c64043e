//! HTTP transport abstraction.
//!
//! Adapters speak to providers exclusively through the [`Transport`]
//! trait: a blocking JSON request and an SSE stream request. The
//! production implementation is [`HttpTransport`] (reqwest +
//! `eventsource-stream`); tests inject scripted transports so adapter
//! translation logic is exercised without a network.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{LlmError, Result};

/// An outbound HTTP request built by an adapter.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Value,
}

impl TransportRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// A completed HTTP exchange. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// One server-sent event frame.
#[derive(Debug, Clone)]
pub struct SseFrame {
    /// The `event:` field; empty for unnamed data-only frames.
    pub event: String,
    pub data: String,
}

/// An async sequence of SSE frames.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// Result of opening a streaming request.
///
/// A non-2xx status never yields a frame stream: the transport drains the
/// body so the adapter can classify the failure with full context.
pub enum StreamOpen {
    Events {
        status: u16,
        headers: HashMap<String, String>,
        frames: SseStream,
    },
    Failure {
        status: u16,
        headers: HashMap<String, String>,
        body: String,
    },
}

/// The narrow contract adapters use to reach a provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and return the full response.
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// POST a JSON body and stream the SSE response.
    async fn stream(&self, request: TransportRequest) -> Result<StreamOpen>;
}

/// Production transport over reqwest.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn build(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        let response = self
            .build(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn stream(&self, request: TransportRequest) -> Result<StreamOpen> {
        let response = self
            .build(&request)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = header_map(response.headers());

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(StreamOpen::Failure {
                status,
                headers,
                body,
            });
        }

        let frames: SseStream = Box::pin(response.bytes_stream().eventsource().map(|item| {
            item.map(|event| SseFrame {
                event: event.event,
                data: event.data,
            })
            .map_err(|e| LlmError::Stream(e.to_string()))
        }));

        Ok(StreamOpen::Events {
            status,
            headers,
            frames,
        })
    }
}

/// Extract a provider error message from a JSON error body, falling back
/// to the raw body when it is not JSON or has no recognizable field.
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for path in [&["error", "message"][..], &["message"][..]] {
            let mut cursor = &value;
            let mut found = true;
            for key in path {
                match cursor.get(key) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                if let Some(text) = cursor.as_str() {
                    return text.to_string();
                }
            }
        }
    }
    body.to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for adapter unit tests.

    use std::sync::Mutex;

    use super::*;

    /// What a [`ScriptedTransport`] should answer next.
    pub(crate) enum ScriptedReply {
        Response(TransportResponse),
        Frames(Vec<SseFrame>),
        FailureBody { status: u16, body: String },
    }

    /// Replays a fixed sequence of replies and records every request.
    pub(crate) struct ScriptedTransport {
        replies: Mutex<Vec<ScriptedReply>>,
        pub(crate) requests: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn ok_json(body: Value) -> Self {
            Self::new(vec![ScriptedReply::Response(TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: body.to_string(),
            })])
        }

        fn next(&self) -> ScriptedReply {
            let mut replies = self.replies.lock().unwrap();
            assert!(!replies.is_empty(), "scripted transport exhausted");
            replies.remove(0)
        }

        pub(crate) fn last_body(&self) -> Value {
            self.requests
                .lock()
                .unwrap()
                .last()
                .expect("no request recorded")
                .body
                .clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.requests.lock().unwrap().push(request);
            match self.next() {
                ScriptedReply::Response(response) => Ok(response),
                ScriptedReply::FailureBody { status, body } => Ok(TransportResponse {
                    status,
                    headers: HashMap::new(),
                    body,
                }),
                ScriptedReply::Frames(_) => panic!("blocking request got frames reply"),
            }
        }

        async fn stream(&self, request: TransportRequest) -> Result<StreamOpen> {
            self.requests.lock().unwrap().push(request);
            match self.next() {
                ScriptedReply::Frames(frames) => Ok(StreamOpen::Events {
                    status: 200,
                    headers: HashMap::new(),
                    frames: Box::pin(futures::stream::iter(frames.into_iter().map(Ok))),
                }),
                ScriptedReply::FailureBody { status, body } => Ok(StreamOpen::Failure {
                    status,
                    headers: HashMap::new(),
                    body,
                }),
                ScriptedReply::Response(_) => panic!("stream request got blocking reply"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_message_prefers_nested_error_field() {
        let body = json!({"error": {"message": "bad key", "type": "auth"}}).to_string();
        assert_eq!(error_message_from_body(&body), "bad key");

        let body = json!({"message": "flat"}).to_string();
        assert_eq!(error_message_from_body(&body), "flat");

        assert_eq!(error_message_from_body("plain text"), "plain text");
    }

    #[test]
    fn transport_response_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-remaining-requests".to_string(), "9".to_string());
        let response = TransportResponse {
            status: 200,
            headers,
            body: String::new(),
        };
        assert_eq!(response.header("X-RateLimit-Remaining-Requests"), Some("9"));
        assert!(response.is_success());
    }
}
