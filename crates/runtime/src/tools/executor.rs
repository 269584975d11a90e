//! Tool executor trait.

use crate::model::ToolCall;
use crate::tools::ToolError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Executes tool calls on behalf of the agent loop.
///
/// This is the boundary between the loop and side effects. Calls from one
/// assistant turn may run concurrently. Unknown tool names are the
/// executor's to reject, usually with [`ToolError::NotFound`].
pub trait ToolExecutor: Send + Sync {
    /// Run one call and return its textual output.
    fn execute(&self, call: &ToolCall) -> impl Future<Output = Result<String, ToolError>> + Send;
}

impl<T: ToolExecutor> ToolExecutor for Arc<T> {
    fn execute(&self, call: &ToolCall) -> impl Future<Output = Result<String, ToolError>> + Send {
        (**self).execute(call)
    }
}

/// Adapts an async closure into a [`ToolExecutor`].
///
/// ```ignore
/// let echo = tool_fn(|call| async move {
///     Ok(call.arguments["text"].as_str().unwrap_or_default().to_string())
/// });
/// ```
pub struct FnExecutor<F>(F);

pub fn tool_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    FnExecutor(f)
}

impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send,
{
    fn execute(&self, call: &ToolCall) -> impl Future<Output = Result<String, ToolError>> + Send {
        (self.0)(call.clone())
    }
}

impl<F> fmt::Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExecutor")
    }
}
