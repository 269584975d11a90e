//! Tool execution boundary.

mod empty;
mod errors;
mod executor;

pub use empty::EmptyToolExecutor;
pub use errors::ToolError;
pub use executor::{FnExecutor, ToolExecutor, tool_fn};
