//! Agent tool loop.
//!
//! A run alternates model calls with tool dispatch:
//!
//! ```text
//! Idle -> AwaitingModel -> (ToolDispatch <-> AwaitingModel) -> Done
//! ```
//!
//! with a transition to `Failed` from any state. Model calls are
//! sequential. Tool calls from one assistant turn run concurrently, and
//! their results are appended in the order the calls appeared.

mod dispatch;
mod state;

pub use state::{AgentEvent, AgentState, LoopOutcome};

use crate::catalog::ModelDescriptor;
use crate::client::AiClient;
use crate::model::{ChatMessage, ChatResponse, Context, StopReason, ToolCall, ToolDefinition};
use crate::provider::ChatOptions;
use crate::stream::ChatStreamEvent;
use crate::tools::{EmptyToolExecutor, ToolExecutor};
use crate::transcript::RunId;
use crate::{PiError, Result};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

/// Bounds and call options for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Tool round trips allowed before the run fails.
    pub max_turns: usize,
    /// Deadline for each model call.
    pub call_timeout: Option<Duration>,
    /// Deadline for each tool call.
    pub tool_timeout: Option<Duration>,
    /// Tool calls of one turn in flight at once.
    pub max_parallel_tools: usize,
    /// Use streaming model calls.
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 16,
            call_timeout: None,
            tool_timeout: None,
            max_parallel_tools: 8,
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Drives one conversation with one model.
///
/// An `Agent` holds no conversation state; every [`run`](Self::run) owns
/// its context exclusively, so one agent can serve many runs at once.
pub struct Agent<E = EmptyToolExecutor> {
    client: AiClient,
    model: ModelDescriptor,
    tools: Vec<ToolDefinition>,
    executor: E,
    config: AgentConfig,
    observer: Option<UnboundedSender<AgentEvent>>,
}

impl Agent<EmptyToolExecutor> {
    pub fn new(client: AiClient, model: ModelDescriptor) -> Self {
        Self {
            client,
            model,
            tools: Vec::new(),
            executor: EmptyToolExecutor,
            config: AgentConfig::default(),
            observer: None,
        }
    }
}

impl<E: ToolExecutor> Agent<E> {
    /// Offer `tools` to the model and run calls through `executor`.
    pub fn with_tools<T: ToolExecutor>(self, tools: Vec<ToolDefinition>, executor: T) -> Agent<T> {
        Agent {
            client: self.client,
            model: self.model,
            tools,
            executor,
            config: self.config,
            observer: self.observer,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Send progress events to `observer`. Send failures are ignored.
    pub fn with_observer(mut self, observer: UnboundedSender<AgentEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    pub async fn run(&self, context: Context) -> LoopOutcome {
        self.run_with_cancel(context, CancellationToken::new()).await
    }

    /// Run until the model stops asking for tools, or the run fails.
    ///
    /// Cancelling `cancel` aborts the in-flight model call or tool batch and
    /// ends the run in `Failed(Cancelled)`.
    pub async fn run_with_cancel(&self, context: Context, cancel: CancellationToken) -> LoopOutcome {
        let run_id = RunId::new();
        let span = info_span!(
            "agent_run",
            %run_id,
            provider = %self.model.provider,
            model = %self.model.id,
        );
        let mut run = Run {
            context,
            responses: Vec::new(),
            turns: 0,
        };

        let result = self.drive(&mut run, &cancel).instrument(span.clone()).await;
        match result {
            Ok(response) => {
                span.in_scope(|| {
                    self.transition(run.turns, AgentState::Done);
                    debug!(turns = run.turns, "run finished");
                });
                LoopOutcome::Done {
                    run_id,
                    response,
                    responses: run.responses,
                    context: run.context,
                    turns: run.turns,
                }
            }
            Err(error) => {
                span.in_scope(|| {
                    self.transition(run.turns, AgentState::Failed);
                    info!(kind = ?error.kind(), error = %error, turns = run.turns, "run failed");
                });
                LoopOutcome::Failed {
                    run_id,
                    error,
                    responses: run.responses,
                    context: run.context,
                    turns: run.turns,
                }
            }
        }
    }

    async fn drive(&self, run: &mut Run, cancel: &CancellationToken) -> Result<ChatResponse> {
        self.transition(0, AgentState::Idle);
        self.check_tools()?;
        run.context.ensure_ready()?;

        loop {
            self.transition(run.turns, AgentState::AwaitingModel);
            if cancel.is_cancelled() {
                return Err(PiError::Cancelled);
            }

            let response = self.call_model(&run.context, cancel).await?;
            self.append(&mut run.context, response.message.clone());
            run.responses.push(response.clone());

            let calls: Vec<ToolCall> = response.tool_calls().into_iter().cloned().collect();
            match response.stop_reason {
                StopReason::Error => {
                    return Err(PiError::provider("model stopped with an error"));
                }
                StopReason::Stop | StopReason::Length => return Ok(response),
                StopReason::ToolCalls if calls.is_empty() => return Ok(response),
                StopReason::ToolCalls => {}
            }

            if run.turns >= self.config.max_turns {
                return Err(PiError::TurnLimitExceeded {
                    max_turns: self.config.max_turns,
                });
            }
            run.turns += 1;
            self.transition(run.turns, AgentState::ToolDispatch);

            let batch = dispatch::dispatch(
                &self.executor,
                &self.tools,
                calls,
                self.config.max_parallel_tools,
                self.config.tool_timeout,
            );
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PiError::Cancelled),
                results = batch => results,
            };
            for result in results {
                self.emit(AgentEvent::ToolResult {
                    result: result.clone(),
                });
                self.append(&mut run.context, ChatMessage::tool_result(result));
            }
        }
    }

    async fn call_model(&self, context: &Context, cancel: &CancellationToken) -> Result<ChatResponse> {
        let options = ChatOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            timeout: self.config.call_timeout,
            cancel: Some(cancel.clone()),
        };

        if !self.config.stream {
            return self
                .client
                .complete(&self.model, context, &self.tools, &options)
                .await;
        }

        let mut stream = self
            .client
            .stream(&self.model, context, &self.tools, &options)
            .await?;
        while let Some(event) = stream.next().await {
            let terminal = match &event {
                ChatStreamEvent::End { response } => Some(Ok(response.clone())),
                ChatStreamEvent::Error { .. } => event.as_error().map(|err| Err(self.restore(err))),
                _ => None,
            };
            self.emit(AgentEvent::Stream { event });
            if let Some(result) = terminal {
                return result;
            }
        }
        Err(PiError::Decode("stream ended without a terminal event".into()))
    }

    /// Stream errors lose structured fields; put back what the loop knows.
    fn restore(&self, err: PiError) -> PiError {
        match (err, self.config.call_timeout) {
            (PiError::Timeout { .. }, Some(after)) => PiError::Timeout { after },
            (err, _) => err,
        }
    }

    fn check_tools(&self) -> Result<()> {
        let mut seen = HashSet::new();
        match self.tools.iter().find(|t| !seen.insert(t.name.as_str())) {
            Some(dup) => Err(PiError::InvalidInput(format!(
                "duplicate tool name: {}",
                dup.name
            ))),
            None => Ok(()),
        }
    }

    fn append(&self, context: &mut Context, message: ChatMessage) {
        context.push(message.clone());
        self.emit(AgentEvent::Message { message });
    }

    fn transition(&self, turn: usize, state: AgentState) {
        debug!(turn, %state, "agent state");
        self.emit(AgentEvent::State { turn, state });
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}

/// Mutable state of one run.
struct Run {
    context: Context,
    responses: Vec<ChatResponse>,
    turns: usize,
}
