//! Tool dispatch for one assistant turn.

use crate::error::PiError;
use crate::model::{ToolCall, ToolDefinition, ToolResult};
use crate::tools::{ToolError, ToolExecutor};
use futures::{StreamExt, stream};
use std::time::Duration;
use tracing::{debug, warn};

/// Run `calls` with at most `parallel` in flight.
///
/// Results come back in call order regardless of completion order. A
/// failing call yields an error-flagged result instead of an error.
pub(crate) async fn dispatch<E: ToolExecutor>(
    executor: &E,
    definitions: &[ToolDefinition],
    calls: Vec<ToolCall>,
    parallel: usize,
    timeout: Option<Duration>,
) -> Vec<ToolResult> {
    stream::iter(calls)
        .map(|call| run_one(executor, definitions, call, timeout))
        .buffered(parallel.max(1))
        .collect()
        .await
}

async fn run_one<E: ToolExecutor>(
    executor: &E,
    definitions: &[ToolDefinition],
    call: ToolCall,
    timeout: Option<Duration>,
) -> ToolResult {
    match execute(executor, definitions, &call, timeout).await {
        Ok(content) => {
            debug!(tool = %call.name, call_id = %call.id, "tool finished");
            ToolResult::success(call.id, content)
        }
        Err(err) => {
            let report = PiError::ToolDispatch {
                tool: call.name.clone(),
                message: err.to_string(),
            };
            warn!(call_id = %call.id, error = %report, "tool failed");
            ToolResult::error(call.id, report.to_string())
        }
    }
}

async fn execute<E: ToolExecutor>(
    executor: &E,
    definitions: &[ToolDefinition],
    call: &ToolCall,
    timeout: Option<Duration>,
) -> Result<String, ToolError> {
    if !definitions.iter().any(|d| d.name == call.name) {
        return Err(ToolError::NotFound(call.name.clone()));
    }
    match timeout {
        Some(limit) => tokio::time::timeout(limit, executor.execute(call))
            .await
            .map_err(|_| ToolError::Timeout(limit))?,
        None => executor.execute(call).await,
    }
}
