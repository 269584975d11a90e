//! Conversation types shared by providers, the client and the agent loop.
//!
//! Provider-specific wire shapes live in the adapter crates and convert
//! to and from these.

use crate::cost::CostBreakdown;
use crate::{PiError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::ops::{Add, AddAssign};

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier used to pair the call with its result.
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

/// Outcome of one tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// A part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ChatMessage {
    /// Create a message with a role and text content.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a tool message carrying a single result.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolResult(result)],
        }
    }

    pub fn from_parts(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Combined text content.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolResult(r) => Some(r),
            _ => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall(_)))
    }
}

/// Ordered conversation history.
///
/// Messages can only be appended; once pushed they are never modified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    messages: Vec<ChatMessage>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a context with a single user message.
    pub fn from_user(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
        }
    }

    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(text));
        self
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Tool calls from the latest assistant message that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.call_id.as_str())
            .collect();

        self.messages[idx]
            .tool_calls()
            .into_iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .collect()
    }

    /// Check that the context may be sent to a model.
    ///
    /// It must contain a user message, and every tool call of the latest
    /// assistant message must already have a result.
    pub fn ensure_ready(&self) -> Result<()> {
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Err(PiError::InvalidInput(
                "context has no user message".into(),
            ));
        }
        if let Some(call) = self.pending_tool_calls().first() {
            return Err(PiError::InvalidInput(format!(
                "tool call {} ({}) has no result",
                call.id, call.name
            )));
        }
        Ok(())
    }
}

impl From<Vec<ChatMessage>> for Context {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// Tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ToolCalls,
    Stop,
    Length,
    Error,
}

/// Token counts reported by a provider.
///
/// `input_tokens` excludes `cached_input_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_input_tokens: 0,
        }
    }

    pub fn with_cached(mut self, cached_input_tokens: u64) -> Self {
        self.cached_input_tokens = cached_input_tokens;
        self
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cached_input_tokens
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cached_input_tokens: self.cached_input_tokens + rhs.cached_input_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Result of one model round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: TokenUsage,
    /// `None` when the model has no pricing entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.message.tool_calls()
    }
}
