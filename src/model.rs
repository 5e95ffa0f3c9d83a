//! Conversation data model shared by the payload builder and both consumers.

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Role of the message author.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Flatten to text. Parts are joined with a newline, parts without text are skipped.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Content::Text(text) => Cow::Borrowed(text.as_str()),
            Content::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .filter(|text| !text.is_empty())
                    .join("\n"),
            ),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(parts: Vec<ContentPart>) -> Self {
        Content::Parts(parts)
    }
}

fn text_part_kind() -> String {
    "text".to_string()
}

/// One element of a multi-part content sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type", default = "text_part_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Fields the console does not interpret (e.g. `image_url`), kept as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: text_part_kind(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

fn function_kind() -> String {
    "function".to_string()
}

/// A tool invocation attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,

    #[serde(default)]
    pub function: FunctionCall,
}

/// Function name plus raw argument text, exactly as the model produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub arguments: String,
}

/// `null` becomes `Some(None)`; an absent key stays `None` through `default`.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<Content>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Content>::deserialize(deserializer).map(Some)
}

/// A single turn in the conversation.
///
/// Fields are private so that a message's role cannot change after it is
/// created and committed content cannot be edited in place.
///
/// `content` distinguishes a missing key from an explicit `null` so a
/// received message serializes back the way it arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    role: Role,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    content: Option<Option<Content>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,

    /// Extra fields from upstream (`reasoning_content`, `tool_call_id`, ...).
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: Some(Some(content.into())),
            tool_calls: None,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that only calls tools: `content` is `null`.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(None),
            tool_calls: None,
            extra: Map::new(),
        }
        .with_tool_calls(tool_calls)
    }

    /// Attach tool calls; an empty list leaves the message without `tool_calls`.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls).filter(|calls| !calls.is_empty());
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref().and_then(Option::as_ref)
    }

    /// Content flattened to text; empty when the message has no content.
    pub fn text(&self) -> Cow<'_, str> {
        self.content()
            .map_or(Cow::Borrowed(""), Content::as_text)
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Outbound chat completion body: `{ model, messages, stream }`.
///
/// Built once per send by the payload builder and never mutated afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

impl CompletionRequest {
    pub fn new(model: String, messages: Vec<Message>, stream: bool) -> Self {
        Self {
            model,
            messages,
            stream,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// Reason a choice stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}
