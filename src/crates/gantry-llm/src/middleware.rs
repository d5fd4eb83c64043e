//! Middleware hooks around the client dispatch.
//!
//! Blocking middlewares see the request before the adapter and the
//! response after it. For streaming calls the same middlewares are lifted:
//! `before_request` runs once at dispatch, `after_response` runs on the
//! response carried by the terminal `Finish` event.

use async_trait::async_trait;

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// A hook pair around a completion.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_request(&self, _request: &mut Request) -> Result<()> {
        Ok(())
    }

    async fn after_response(&self, _response: &mut Response) -> Result<()> {
        Ok(())
    }
}

/// Logs request/response shape at debug level.
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn before_request(&self, request: &mut Request) -> Result<()> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "llm request"
        );
        Ok(())
    }

    async fn after_response(&self, response: &mut Response) -> Result<()> {
        tracing::debug!(
            id = %response.id,
            finish = ?response.finish_reason,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "llm response"
        );
        Ok(())
    }
}
