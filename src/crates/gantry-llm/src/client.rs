//! The unified client: a registry of provider adapters plus middleware.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use futures::StreamExt;

use crate::error::{LlmError, Result};
use crate::middleware::Middleware;
use crate::provider::{AnthropicAdapter, GeminiAdapter, OpenAiAdapter, ProviderAdapter};
use crate::request::Request;
use crate::response::Response;
use crate::stream::{EventStream, StreamEvent};

/// Routes unified requests to a registered provider adapter.
///
/// Requests pick their provider with `request.provider`; unset requests go
/// to the client's default (the first registered adapter unless overridden).
#[derive(Clone, Default)]
pub struct Client {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect credentials from the environment and register only those
    /// providers whose credentials are present.
    ///
    /// Checked in order: `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, and
    /// `GEMINI_API_KEY`/`GOOGLE_API_KEY`. The first present provider
    /// becomes the default.
    pub fn from_env() -> Self {
        let mut client = Self::new();
        if let Ok(adapter) = AnthropicAdapter::from_env() {
            client = client.register(Arc::new(adapter));
        }
        if let Ok(adapter) = OpenAiAdapter::from_env() {
            client = client.register(Arc::new(adapter));
        }
        if let Ok(adapter) = GeminiAdapter::from_env() {
            client = client.register(Arc::new(adapter));
        }
        client
    }

    /// Register an adapter. The first registration becomes the default
    /// provider.
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let name = adapter.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.adapters.insert(name, adapter);
        self
    }

    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Resolve the adapter a request routes to.
    pub fn adapter_for(&self, request: &Request) -> Result<Arc<dyn ProviderAdapter>> {
        let name = request
            .provider
            .as_deref()
            .or(self.default_provider.as_deref())
            .ok_or_else(|| {
                LlmError::Configuration("no provider requested and no default provider".into())
            })?;
        self.adapters.get(name).cloned().ok_or_else(|| {
            LlmError::Configuration(format!("unknown provider '{name}'"))
        })
    }

    /// Execute a blocking completion through the middleware chain.
    pub async fn complete(&self, mut request: Request) -> Result<Response> {
        let adapter = self.adapter_for(&request)?;
        for middleware in &self.middlewares {
            middleware.before_request(&mut request).await?;
        }
        let mut response = adapter.complete(&request).await?;
        for middleware in &self.middlewares {
            middleware.after_response(&mut response).await?;
        }
        Ok(response)
    }

    /// Execute a streaming completion.
    ///
    /// Blocking middlewares are lifted: `before_request` runs now,
    /// `after_response` is applied to the response inside the `Finish`
    /// event before it reaches the consumer.
    pub async fn stream(&self, mut request: Request) -> Result<EventStream> {
        let adapter = self.adapter_for(&request)?;
        for middleware in &self.middlewares {
            middleware.before_request(&mut request).await?;
        }
        let mut inner = adapter.stream(&request).await?;
        let middlewares = self.middlewares.clone();

        let lifted = try_stream! {
            while let Some(event) = inner.next().await {
                match event? {
                    StreamEvent::Finish { mut response } => {
                        for middleware in &middlewares {
                            middleware.after_response(&mut response).await?;
                        }
                        yield StreamEvent::Finish { response };
                    }
                    event => yield event,
                }
            }
        };

        Ok(Box::pin(lifted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use crate::response::{FinishReason, Usage};
    use async_trait::async_trait;

    pub(crate) struct StaticAdapter {
        name: &'static str,
        text: String,
    }

    impl StaticAdapter {
        pub(crate) fn new(name: &'static str, text: impl Into<String>) -> Self {
            Self {
                name,
                text: text.into(),
            }
        }

        fn response(&self, request: &Request) -> Response {
            Response {
                id: "r1".into(),
                model: request.model.clone(),
                provider: self.name.to_string(),
                message: Message::new(
                    Role::Assistant,
                    vec![crate::message::ContentPart::text(self.text.clone())],
                ),
                finish_reason: FinishReason::Stop,
                finish_reason_raw: None,
                usage: Usage::new(1, 1),
                rate_limit: None,
                warnings: Vec::new(),
                raw: None,
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for StaticAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn complete(&self, request: &Request) -> Result<Response> {
            Ok(self.response(request))
        }

        async fn stream(&self, request: &Request) -> Result<EventStream> {
            let response = self.response(request);
            let events = vec![
                Ok(StreamEvent::TextDelta {
                    index: 0,
                    delta: response.text(),
                }),
                Ok(StreamEvent::Finish { response }),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn routes_by_request_provider_then_default() {
        let client = Client::new()
            .register(Arc::new(StaticAdapter::new("alpha", "from alpha")))
            .register(Arc::new(StaticAdapter::new("beta", "from beta")));

        let request = Request::new("m", vec![Message::user("hi")]);
        let response = client.complete(request.clone()).await.unwrap();
        assert_eq!(response.provider, "alpha");

        let response = client
            .complete(request.clone().with_provider("beta"))
            .await
            .unwrap();
        assert_eq!(response.provider, "beta");

        let error = client
            .complete(request.with_provider("gamma"))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::Configuration(_)));
    }

    #[tokio::test]
    async fn empty_client_reports_configuration_error() {
        let client = Client::new();
        let error = client
            .complete(Request::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::Configuration(_)));
    }

    struct StampMiddleware;

    #[async_trait]
    impl Middleware for StampMiddleware {
        async fn after_response(&self, response: &mut Response) -> Result<()> {
            response.warnings.push("stamped".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn middleware_lifts_into_streams() {
        let client = Client::new()
            .register(Arc::new(StaticAdapter::new("alpha", "hello")))
            .with_middleware(Arc::new(StampMiddleware));

        let response = client
            .complete(Request::new("m", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.warnings, vec!["stamped".to_string()]);

        let stream = client
            .stream(Request::new("m", vec![Message::user("hi")]))
            .await
            .unwrap();
        let response = crate::stream::collect_response(stream).await.unwrap();
        assert_eq!(response.warnings, vec!["stamped".to_string()]);
    }
}
