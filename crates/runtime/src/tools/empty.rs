//! Executor with no tools.

use crate::model::ToolCall;
use crate::tools::{ToolError, ToolExecutor};

/// Rejects every call with [`ToolError::NotFound`].
///
/// For conversations that offer the model no tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyToolExecutor;

impl ToolExecutor for EmptyToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        Err(ToolError::NotFound(call.name.clone()))
    }
}
