use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors a tool executor can report.
///
/// The agent loop never aborts on these; they become error-flagged tool
/// results the model can react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("execution failed: {0}")]
    Execution(String),
}
