//! The streaming event model shared by every adapter.
//!
//! Adapters translate their provider's SSE frames into this one event
//! vocabulary. `Finish` carries the fully assembled [`Response`], so a
//! consumer that only wants the final result can ignore every delta.

use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

use crate::error::Result;
use crate::response::Response;

/// One event from a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart {
        id: Option<String>,
        model: Option<String>,
    },
    TextStart {
        index: usize,
    },
    TextDelta {
        index: usize,
        delta: String,
    },
    TextEnd {
        index: usize,
    },
    ReasoningStart {
        index: usize,
    },
    ReasoningDelta {
        index: usize,
        delta: String,
    },
    ReasoningEnd {
        index: usize,
    },
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: usize,
        arguments_delta: String,
    },
    ToolCallEnd {
        index: usize,
    },
    /// Terminal event carrying the assembled response.
    Finish {
        response: Response,
    },
    Error {
        message: String,
    },
    /// A provider frame with no unified equivalent, passed through raw.
    Provider {
        provider: String,
        payload: Value,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. } | StreamEvent::Error { .. })
    }
}

/// An async sequence of stream events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Drive a stream to completion and return the `Finish` response.
///
/// Fails with a stream error if the sequence ends without one.
pub async fn collect_response(mut stream: EventStream) -> Result<Response> {
    use futures::StreamExt;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Finish { response } => return Ok(response),
            StreamEvent::Error { message } => {
                return Err(crate::error::LlmError::Stream(message));
            }
            _ => {}
        }
    }
    Err(crate::error::LlmError::Stream(
        "stream ended without a finish event".to_string(),
    ))
}
