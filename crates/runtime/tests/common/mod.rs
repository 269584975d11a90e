#![allow(dead_code)]

use pi_runtime::mock::ScriptedProvider;
use pi_runtime::{
    AiClient, ApiKind, ChatMessage, ChatResponse, ModelCatalog, ModelDescriptor, ModelId, Part,
    ProviderHub, ProviderId, Role, StopReason, TokenCost, TokenUsage, ToolCall, ToolDefinition,
};
use serde_json::{Value, json};
use std::sync::Arc;

pub const PROVIDER: &str = "mock";
pub const PRICED: &str = "priced";
pub const FREE: &str = "free";

/// Client with one scripted provider and two models: `priced` at
/// $1/M input and $2/M output, and `free` with no pricing entry.
pub fn client(provider: Arc<ScriptedProvider>) -> AiClient {
    let mut catalog = ModelCatalog::new();
    let descriptor = |id: &str| {
        ModelDescriptor::new(
            ProviderId::new(PROVIDER).unwrap(),
            ModelId::new(id).unwrap(),
            ApiKind::OpenAiCompletions,
            8_192,
        )
    };
    catalog
        .register(descriptor(PRICED).with_pricing(TokenCost::new(1.0, 2.0)))
        .unwrap();
    catalog.register(descriptor(FREE)).unwrap();

    let mut hub = ProviderHub::new();
    hub.insert(ProviderId::new(PROVIDER).unwrap(), provider)
        .unwrap();
    AiClient::new(catalog, hub)
}

pub fn text_reply(text: &str, usage: TokenUsage) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::assistant(text),
        usage,
        cost: None,
        stop_reason: StopReason::Stop,
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

pub fn calls_reply(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::from_parts(
            Role::Assistant,
            calls.into_iter().map(Part::ToolCall).collect(),
        ),
        usage: TokenUsage::new(5, 5),
        cost: None,
        stop_reason: StopReason::ToolCalls,
    }
}

pub fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(
        name,
        format!("{name} tool"),
        json!({"type": "object", "properties": {"text": {"type": "string"}}}),
    )
}
