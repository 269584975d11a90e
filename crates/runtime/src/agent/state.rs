use crate::cost::CostBreakdown;
use crate::error::PiError;
use crate::model::{ChatMessage, ChatResponse, Context, TokenUsage, ToolResult};
use crate::stream::ChatStreamEvent;
use crate::transcript::{RecordKind, RunId, Transcript};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModel,
    ToolDispatch,
    Done,
    Failed,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::ToolDispatch => "tool_dispatch",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress notification sent to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    State { turn: usize, state: AgentState },
    Stream { event: ChatStreamEvent },
    ToolResult { result: ToolResult },
    /// A message was appended to the context.
    Message { message: ChatMessage },
}

/// Terminal state of a run.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    Done {
        run_id: RunId,
        /// The final model response.
        response: ChatResponse,
        /// Every model response of the run, in order.
        responses: Vec<ChatResponse>,
        context: Context,
        /// Completed tool round trips.
        turns: usize,
    },
    Failed {
        run_id: RunId,
        error: PiError,
        responses: Vec<ChatResponse>,
        context: Context,
        turns: usize,
    },
}

impl LoopOutcome {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Done { run_id, .. } | Self::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn state(&self) -> AgentState {
        match self {
            Self::Done { .. } => AgentState::Done,
            Self::Failed { .. } => AgentState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub fn context(&self) -> &Context {
        match self {
            Self::Done { context, .. } | Self::Failed { context, .. } => context,
        }
    }

    pub fn turns(&self) -> usize {
        match self {
            Self::Done { turns, .. } | Self::Failed { turns, .. } => *turns,
        }
    }

    pub fn responses(&self) -> &[ChatResponse] {
        match self {
            Self::Done { responses, .. } | Self::Failed { responses, .. } => responses,
        }
    }

    pub fn error(&self) -> Option<&PiError> {
        match self {
            Self::Done { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    /// The final response and context, or the failure.
    pub fn into_result(self) -> Result<(ChatResponse, Context), PiError> {
        match self {
            Self::Done {
                response, context, ..
            } => Ok((response, context)),
            Self::Failed { error, .. } => Err(error),
        }
    }

    /// Tokens used across every model call of the run.
    pub fn usage(&self) -> TokenUsage {
        self.responses()
            .iter()
            .fold(TokenUsage::default(), |acc, r| acc + r.usage)
    }

    /// Sum of known costs; `None` if no response carried one.
    pub fn cost(&self) -> Option<CostBreakdown> {
        self.responses()
            .iter()
            .filter_map(|r| r.cost)
            .reduce(|a, b| a + b)
    }

    /// Transcript of the final context, framed by start and end records.
    pub fn transcript(&self) -> Transcript {
        let mut transcript = Transcript::new(self.run_id());
        transcript.push(RecordKind::RunStart);
        for message in self.context().messages() {
            transcript.push(RecordKind::Message {
                message: message.clone(),
            });
        }
        transcript.push(RecordKind::RunEnd {
            outcome: self.error().map(PiError::report),
        });
        transcript
    }
}
