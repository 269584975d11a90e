//! Provider abstraction.

use crate::catalog::ModelDescriptor;
use crate::error::Operation;
use crate::model::{ChatResponse, Context, ToolDefinition};
use crate::stream::ChatStream;
use crate::{PiError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Operations a provider implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub complete: bool,
    pub stream: bool,
}

impl ProviderCapabilities {
    pub const ALL: Self = Self {
        complete: true,
        stream: true,
    };

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Complete => self.complete,
            Operation::Stream => self.stream,
            Operation::Tools => true,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    /// Overrides the descriptor's output limit.
    pub max_tokens: Option<u32>,
    /// Deadline for the whole call, including the stream.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Output token limit to send, falling back to the descriptor.
    pub fn max_tokens_for(&self, model: &ModelDescriptor) -> Option<u32> {
        self.max_tokens
            .or((model.max_output_tokens > 0).then_some(model.max_output_tokens))
    }
}

/// Everything a provider needs for one round trip.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub model: &'a ModelDescriptor,
    pub context: &'a Context,
    pub tools: &'a [ToolDefinition],
    pub options: &'a ChatOptions,
}

/// An LLM backend reachable through the hub.
///
/// Implementations override the operations they support and report them
/// in [`capabilities`](Provider::capabilities). Callers check capabilities
/// before dispatch; the defaults exist so a one-sided provider stays small.
///
/// `stream` may fail before the first event (connection refused, non-2xx
/// status). Once a [`ChatStream`] is returned, every later failure is
/// reported as its terminal `Error` event.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ChatResponse> {
        let _ = request;
        Err(PiError::UnsupportedOperation {
            provider: self.name().to_string(),
            operation: Operation::Complete,
        })
    }

    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ChatStream> {
        let _ = request;
        Err(PiError::UnsupportedOperation {
            provider: self.name().to_string(),
            operation: Operation::Stream,
        })
    }
}
