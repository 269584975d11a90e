use crate::error::{ErrorKind, PiError};
use crate::model::{ChatResponse, StopReason, TokenUsage};
use serde::{Deserialize, Serialize};

/// Canonical streaming event.
///
/// A well-formed stream is one `Start`, any number of deltas, then exactly
/// one terminal event (`End` or `Error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Start,
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments_fragment: Option<String>,
    },
    /// Informational; the figures on `End` supersede it.
    Usage {
        usage: TokenUsage,
    },
    End {
        response: ChatResponse,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ChatStreamEvent {
    pub fn error(err: &PiError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }

    /// Rebuild the error carried by an `Error` event.
    pub fn as_error(&self) -> Option<PiError> {
        match self {
            Self::Error { kind, message } => Some(PiError::from_stream(*kind, message.clone())),
            _ => None,
        }
    }
}

/// One decoded unit of a provider's wire stream.
///
/// Decoders emit these; the pump folds them into [`ChatStreamEvent`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    /// Fragment of a tool call. Fragments sharing an id belong together.
    ToolCall {
        id: String,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// The provider marked the call's arguments as complete.
    ToolCallComplete {
        id: String,
    },
    Usage(TokenUsage),
    Stop(StopReason),
    /// The wire protocol's end-of-response marker.
    Done,
}
