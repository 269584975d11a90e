//! Error taxonomy for the runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the runtime and its provider adapters.
///
/// Variants carry owned strings rather than source errors so the value can be
/// cloned into terminal loop states and stream events.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum PiError {
    /// No provider is bound under this id.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The catalog has no descriptor for this (provider, model) pair.
    #[error("unknown model: {provider}/{model}")]
    UnknownModel { provider: String, model: String },

    /// A provider with this id is already bound.
    #[error("duplicate provider: {0}")]
    DuplicateProvider(String),

    /// A descriptor for this (provider, model) pair is already registered.
    #[error("duplicate model: {provider}/{model}")]
    DuplicateModel { provider: String, model: String },

    /// The provider or model does not support the requested operation.
    #[error("{provider} does not support {operation}")]
    UnsupportedOperation {
        provider: String,
        operation: Operation,
    },

    /// Network failure or non-success status from the provider.
    #[error("provider error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },

    /// A response body or stream frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The agent loop needed more tool round trips than allowed.
    #[error("turn limit exceeded: more than {max_turns} tool turns")]
    TurnLimitExceeded { max_turns: usize },

    /// A call did not finish before its deadline.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,

    /// An external tool call failed.
    #[error("tool {tool} failed: {message}")]
    ToolDispatch { tool: String, message: String },

    /// An input violated a runtime invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or resolved.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PiError>;

/// A provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Complete,
    Stream,
    Tools,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Stream => write!(f, "stream"),
            Self::Tools => write!(f, "tools"),
        }
    }
}

/// Closed set of error kinds, used where a [`PiError`] is flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownProvider,
    UnknownModel,
    DuplicateProvider,
    DuplicateModel,
    UnsupportedOperation,
    Provider,
    Decode,
    TurnLimitExceeded,
    Timeout,
    Cancelled,
    ToolDispatch,
    InvalidInput,
    Config,
}

impl ErrorKind {
    /// Stable non-zero status code for boundaries that only carry an integer.
    ///
    /// `0` is reserved for success.
    pub fn code(self) -> i32 {
        match self {
            Self::UnknownProvider => 1,
            Self::UnknownModel => 2,
            Self::DuplicateProvider => 3,
            Self::DuplicateModel => 4,
            Self::UnsupportedOperation => 5,
            Self::Provider => 6,
            Self::Decode => 7,
            Self::TurnLimitExceeded => 8,
            Self::Timeout => 9,
            Self::Cancelled => 10,
            Self::ToolDispatch => 11,
            Self::InvalidInput => 12,
            Self::Config => 13,
        }
    }
}

impl PiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Self::UnknownModel { .. } => ErrorKind::UnknownModel,
            Self::DuplicateProvider(_) => ErrorKind::DuplicateProvider,
            Self::DuplicateModel { .. } => ErrorKind::DuplicateModel,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Decode(_) => ErrorKind::Decode,
            Self::TurnLimitExceeded { .. } => ErrorKind::TurnLimitExceeded,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ToolDispatch { .. } => ErrorKind::ToolDispatch,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for a provider error without an HTTP status.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            status: None,
            message: message.into(),
        }
    }

    /// Rebuilds an error from the `(kind, message)` pair carried by a stream
    /// error event.
    ///
    /// Kinds without structured fields round-trip exactly; the rest keep the
    /// message text and lose their fields.
    pub fn from_stream(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Decode => Self::Decode(message),
            ErrorKind::InvalidInput => Self::InvalidInput(message),
            ErrorKind::Config => Self::Config(message),
            ErrorKind::Timeout => Self::Timeout {
                after: Duration::ZERO,
            },
            _ => Self::provider(message),
        }
    }

    /// Whether the whole operation may reasonably be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Provider { status, .. } => match status {
                None => true,
                Some(s) => *s == 408 || *s == 429 || *s >= 500,
            },
            _ => false,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// A [`PiError`] flattened to a status code plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: i32,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PiError> for ErrorReport {
    fn from(err: &PiError) -> Self {
        let kind = err.kind();
        Self {
            code: kind.code(),
            kind,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_nonzero() {
        let kinds = [
            ErrorKind::UnknownProvider,
            ErrorKind::UnknownModel,
            ErrorKind::DuplicateProvider,
            ErrorKind::DuplicateModel,
            ErrorKind::UnsupportedOperation,
            ErrorKind::Provider,
            ErrorKind::Decode,
            ErrorKind::TurnLimitExceeded,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::ToolDispatch,
            ErrorKind::InvalidInput,
            ErrorKind::Config,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn timeout_is_distinct_from_provider_and_cancel() {
        let timeout = PiError::Timeout {
            after: Duration::from_secs(1),
        };
        assert_ne!(timeout.kind(), ErrorKind::Provider);
        assert_ne!(timeout.kind(), PiError::Cancelled.kind());
    }

    #[test]
    fn report_flattens_kind_and_message() {
        let err = PiError::Provider {
            status: Some(503),
            message: "overloaded".into(),
        };
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::Provider);
        assert_eq!(report.code, 6);
        assert_eq!(report.message, "provider error (503): overloaded");
    }

    #[test]
    fn retryable_statuses() {
        assert!(PiError::Provider {
            status: Some(429),
            message: String::new()
        }
        .is_retryable());
        assert!(!PiError::Provider {
            status: Some(400),
            message: String::new()
        }
        .is_retryable());
        assert!(!PiError::Cancelled.is_retryable());
    }

    #[test]
    fn stream_kinds_round_trip() {
        assert_eq!(
            PiError::from_stream(ErrorKind::Cancelled, "x"),
            PiError::Cancelled
        );
        assert_eq!(
            PiError::from_stream(ErrorKind::Decode, "bad frame"),
            PiError::Decode("bad frame".into())
        );
    }
}
