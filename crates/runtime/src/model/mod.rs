//! Identifiers and conversation types.

mod ids;
pub mod types;

pub use ids::{ModelId, ProviderId};
pub use types::{
    ChatMessage, ChatResponse, Context, Part, Role, StopReason, TokenUsage, ToolCall,
    ToolDefinition, ToolResult,
};
