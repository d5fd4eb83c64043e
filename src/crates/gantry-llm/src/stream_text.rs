//! Multi-consumer replayable streaming over the tool loop.
//!
//! [`stream`] spawns a producer that runs the same loop as
//! [`crate::generate::generate`] but over `Client::stream`, appending
//! every event to a shared ring. A subscriber arriving after production
//! started still replays the full history from index zero. Cancellation
//! stops the producer and surfaces an error event to every subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::Notify;

use crate::cancel::run_bounded;
use crate::client::Client;
use crate::error::{LlmError, Result};
use crate::generate::{run_tool_calls, tool_results_message, GenerateOptions};
use crate::response::{FinishReason, Response};
use crate::stream::StreamEvent;

struct Shared {
    events: Mutex<Vec<StreamEvent>>,
    done: AtomicBool,
    notify: Notify,
    outcome: Mutex<Option<Result<Response>>>,
}

impl Shared {
    fn push(&self, event: StreamEvent) {
        self.events.lock().unwrap().push(event);
        self.notify.notify_waiters();
    }

    fn settle(&self, outcome: Result<Response>) {
        if let Err(error) = &outcome {
            self.push(StreamEvent::Error {
                message: error.to_string(),
            });
        }
        *self.outcome.lock().unwrap() = Some(outcome);
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Handle to an in-flight streaming generation.
///
/// Cheap to clone; every clone sees the same buffered event history.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

/// Start a streaming generation with the tool loop.
pub fn stream(client: Client, options: GenerateOptions) -> StreamHandle {
    let shared = Arc::new(Shared {
        events: Mutex::new(Vec::new()),
        done: AtomicBool::new(false),
        notify: Notify::new(),
        outcome: Mutex::new(None),
    });

    let producer_shared = shared.clone();
    tokio::spawn(async move {
        let outcome = produce(&client, options, &producer_shared).await;
        producer_shared.settle(outcome);
    });

    StreamHandle { shared }
}

async fn produce(
    client: &Client,
    options: GenerateOptions,
    shared: &Shared,
) -> Result<Response> {
    let mut conversation = options.initial_messages()?;
    let deadline = options.timeout.map(|total| Instant::now() + total);
    let signal = options.cancellation.clone();

    let mut rounds: u32 = 0;
    let mut final_response: Option<Response> = None;

    loop {
        if let Some(token) = &signal {
            if token.is_cancelled() {
                return Err(LlmError::Aborted);
            }
        }
        let budget = match (deadline, options.timeout) {
            (Some(deadline), Some(total)) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(LlmError::RequestTimeout(total));
                }
                Some(deadline - now)
            }
            _ => None,
        };

        let request = options.to_request(conversation.clone());
        let round_response = run_bounded(signal.as_ref(), budget, async {
            let mut events = client.stream(request).await?;
            let mut finish: Option<Response> = None;
            while let Some(event) = events.next().await {
                let event = event?;
                if let StreamEvent::Finish { response } = &event {
                    finish = Some(response.clone());
                }
                shared.push(event);
            }
            finish.ok_or_else(|| {
                LlmError::Stream("stream ended without a finish event".to_string())
            })
        })
        .await?;

        let calls = round_response.tool_calls();
        let tool_finish =
            round_response.finish_reason == FinishReason::ToolCalls && !calls.is_empty();
        let any_executable = calls.iter().any(|call| {
            options
                .tools
                .iter()
                .any(|tool| tool.name() == call.name && !tool.is_passive())
        });

        if !tool_finish || rounds >= options.max_tool_rounds || !any_executable {
            final_response = Some(round_response);
            break;
        }

        let records = run_tool_calls(&options.tools, &calls).await;
        conversation.push(round_response.message.clone());
        conversation.push(tool_results_message(&records));
        rounds += 1;
    }

    final_response.ok_or_else(|| LlmError::Stream("producer made no rounds".to_string()))
}

impl StreamHandle {
    /// Replay every buffered event and follow the live stream to the end.
    pub fn events(&self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let shared = self.shared.clone();
        async_stream::stream! {
            let mut index = 0usize;
            loop {
                // Register interest before inspecting the buffer so a
                // push between check and await still wakes us.
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let next = {
                    let events = shared.events.lock().unwrap();
                    if index < events.len() {
                        Some(events[index].clone())
                    } else if shared.done.load(Ordering::SeqCst) {
                        break;
                    } else {
                        None
                    }
                };
                match next {
                    Some(event) => {
                        index += 1;
                        yield event;
                    }
                    None => notified.await,
                }
            }
        }
    }

    /// Only the text deltas, concatenable into the final text.
    pub fn text_stream(&self) -> impl Stream<Item = String> + Send + 'static {
        self.events().filter_map(|event| async move {
            match event {
                StreamEvent::TextDelta { delta, .. } => Some(delta),
                _ => None,
            }
        })
    }

    /// The final assembled response. Fails if the producer errored or the
    /// stream ended without a finish event carrying a response.
    pub async fn response(&self) -> Result<Response> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.done.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        self.shared
            .outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(LlmError::Stream("stream settled without outcome".into())))
    }
}
