//! The shared message and content algebra.
//!
//! Every provider adapter translates to and from this one representation:
//! a [`Message`] is a role plus an ordered sequence of [`ContentPart`]s.
//! The part enum is a closed sum over the eight content kinds the wire
//! formats distinguish; each variant carries only its own payload.
//!
//! Thinking payloads are opaque to this crate: `signature` and redacted
//! `data` are preserved verbatim across request/response round-trips and
//! never inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Developer,
}

/// Where an image comes from: a fetchable URL or inline base64 data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

/// Arguments attached to a tool call: either already-parsed JSON or the
/// raw string the provider streamed before it could be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Json(Value),
    Raw(String),
}

impl ToolArguments {
    /// Parse into a JSON value, falling back to an empty object when the
    /// raw fragment is not valid JSON.
    pub fn parsed(&self) -> Value {
        match self {
            ToolArguments::Json(value) => value.clone(),
            ToolArguments::Raw(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
            }
        }
    }

    /// Render as a compact JSON string for wire formats that want text.
    pub fn to_json_string(&self) -> String {
        match self {
            ToolArguments::Json(value) => value.to_string(),
            ToolArguments::Raw(raw) => raw.clone(),
        }
    }
}

/// One typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Audio {
        media_type: String,
        data: String,
    },
    Document {
        media_type: String,
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: ToolArguments,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        text: String,
        /// Opaque provider signature; preserved verbatim, never inspected.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        /// Opaque provider payload; preserved verbatim, never inspected.
        data: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ContentPart::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: ToolArguments::Json(arguments),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentPart::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// A structured view of one tool call inside an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallView {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// A role plus ordered content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self::new(Role::Developer, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text of all `Thinking` parts.
    pub fn reasoning_text(&self) -> Option<String> {
        let text: String = self
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Thinking { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Structured views of every tool call in this message.
    pub fn tool_calls(&self) -> Vec<ToolCallView> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCallView {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Merge consecutive messages that share a role into one message.
///
/// Every adapter applies this before translation: the wire formats reject
/// (or silently misbehave on) back-to-back same-role turns.
pub fn merge_consecutive_same_role(messages: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.extend(message.content.iter().cloned());
            }
            _ => merged.push(message.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_accessor_skips_non_text_parts() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentPart::Thinking {
                    text: "hmm".into(),
                    signature: None,
                },
                ContentPart::text("Hello"),
                ContentPart::tool_call("t1", "lookup", json!({"q": 1})),
                ContentPart::text(" world"),
            ],
        );
        assert_eq!(message.text(), "Hello world");
        assert_eq!(message.reasoning_text().as_deref(), Some("hmm"));
        assert_eq!(message.tool_calls().len(), 1);
    }

    #[test]
    fn merge_joins_adjacent_roles_only() {
        let merged = merge_consecutive_same_role(&[
            Message::user("a"),
            Message::user("b"),
            Message::assistant("c"),
            Message::user("d"),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].content.len(), 2);
        assert_eq!(merged[0].text(), "ab");
        assert_eq!(merged[2].text(), "d");
    }

    #[test]
    fn raw_arguments_fall_back_to_empty_object() {
        let args = ToolArguments::Raw("{not json".into());
        assert_eq!(args.parsed(), json!({}));
        let args = ToolArguments::Raw(r#"{"x":2}"#.into());
        assert_eq!(args.parsed(), json!({"x": 2}));
    }

    #[test]
    fn content_part_serde_round_trip() {
        let part = ContentPart::Image {
            source: ImageSource::Base64 {
                media_type: "image/png".into(),
                data: "aGk=".into(),
            },
        };
        let encoded = serde_json::to_string(&part).unwrap();
        assert!(encoded.contains(r#""type":"image""#));
        let decoded: ContentPart = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, part);
    }
}
