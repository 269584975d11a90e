//! Anthropic messages adapter.

use crate::http::{self, endpoint};
use crate::sse::{SseEvent, SseParser};
use async_trait::async_trait;
use pi_runtime::stream::normalize;
use pi_runtime::{
    ChatMessage, ChatResponse, ChatStream, Delta, FrameDecoder, Part, PiError, Provider,
    ProviderCapabilities, ProviderRequest, Result, Role, StopReason, TokenUsage, ToolCall,
    ToolDefinition,
};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";

/// Output limit sent when neither the call nor the model sets one; the
/// messages API requires `max_tokens`.
const FALLBACK_MAX_TOKENS: u32 = 4096;

/// Authentication mode for the messages API.
#[derive(Clone)]
pub enum AnthropicAuth {
    /// Standard API key, sent as `x-api-key`.
    ApiKey(String),
    /// OAuth access token, sent as a bearer token.
    OauthToken(String),
}

impl fmt::Display for AnthropicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::OauthToken(_) => write!(f, "oauth"),
        }
    }
}

impl fmt::Debug for AnthropicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}(<redacted>)")
    }
}

impl AnthropicAuth {
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.header("x-api-key", key),
            Self::OauthToken(token) => req.bearer_auth(token).header("anthropic-beta", OAUTH_BETA),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

impl ApiContent {
    fn into_blocks(self) -> Vec<ApiContentBlock> {
        match self {
            Self::Text(text) => vec![ApiContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Usage as reported by `message_start`, `message_delta` and complete
/// responses. Later reports only carry the fields that changed.
#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl ApiUsage {
    fn merge_into(&self, usage: &mut TokenUsage) {
        if let Some(n) = self.input_tokens {
            usage.input_tokens = n;
        }
        if let Some(n) = self.output_tokens {
            usage.output_tokens = n;
        }
        if let Some(n) = self.cache_read_input_tokens {
            usage.cached_input_tokens = n;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ApiResponseBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<ApiUsage>,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    error_type: String,
    message: String,
}

fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_use" => StopReason::ToolCalls,
        "max_tokens" | "model_context_window_exceeded" => StopReason::Length,
        "refusal" => StopReason::Error,
        _ => StopReason::Stop,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversion
// ─────────────────────────────────────────────────────────────────────────────

fn role_to_api(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        // tool results travel on user turns
        Role::User | Role::Tool | Role::System => "user",
    }
}

fn message_to_api(msg: &ChatMessage) -> ApiMessage {
    let role = role_to_api(msg.role);

    if let [Part::Text { text }] = msg.parts.as_slice() {
        return ApiMessage {
            role,
            content: ApiContent::Text(text.clone()),
        };
    }

    let blocks = msg
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => ApiContentBlock::Text { text: text.clone() },
            Part::ToolCall(call) => ApiContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            },
            Part::ToolResult(result) => ApiContentBlock::ToolResult {
                tool_use_id: result.call_id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            },
        })
        .collect();

    ApiMessage {
        role,
        content: ApiContent::Blocks(blocks),
    }
}

/// Convert the conversation, lifting system messages into the `system`
/// field and merging consecutive same-role turns; the API requires
/// alternating roles.
fn messages_to_api(messages: &[ChatMessage]) -> (Option<String>, Vec<ApiMessage>) {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(ChatMessage::text)
        .collect();

    let mut out: Vec<ApiMessage> = Vec::new();
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        let next = message_to_api(msg);
        match out.last_mut() {
            Some(last) if last.role == next.role => {
                let content = std::mem::replace(&mut last.content, ApiContent::Blocks(Vec::new()));
                let mut blocks = content.into_blocks();
                blocks.extend(next.content.into_blocks());
                last.content = ApiContent::Blocks(blocks);
            }
            _ => out.push(next),
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

fn tool_to_api(tool: &ToolDefinition) -> ApiTool<'_> {
    ApiTool {
        name: &tool.name,
        description: &tool.description,
        input_schema: &tool.parameters,
    }
}

fn build_request<'a>(request: &ProviderRequest<'a>, stream: bool) -> ApiRequest<'a> {
    let (system, messages) = messages_to_api(request.context.messages());
    ApiRequest {
        model: request.model.id.as_str(),
        max_tokens: request
            .options
            .max_tokens_for(request.model)
            .unwrap_or(FALLBACK_MAX_TOKENS),
        messages,
        system,
        tools: request.tools.iter().map(tool_to_api).collect(),
        temperature: request.options.temperature,
        stream,
    }
}

fn response_from_api(response: ApiResponse) -> ChatResponse {
    let parts: Vec<Part> = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ApiResponseBlock::Text { text } => Some(Part::text(text)),
            ApiResponseBlock::ToolUse { id, name, input } => Some(Part::ToolCall(ToolCall {
                id,
                name,
                arguments: if input.is_null() {
                    Value::Object(Default::default())
                } else {
                    input
                },
            })),
            ApiResponseBlock::Unknown => None,
        })
        .collect();
    let has_calls = parts.iter().any(|p| matches!(p, Part::ToolCall(_)));

    let mut usage = TokenUsage::default();
    response.usage.merge_into(&mut usage);

    let stop_reason = match response.stop_reason.as_deref() {
        Some(reason) => stop_reason(reason),
        None if has_calls => StopReason::ToolCalls,
        None => StopReason::Stop,
    };

    ChatResponse {
        message: ChatMessage::from_parts(Role::Assistant, parts),
        usage,
        cost: None,
        stop_reason,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes a messages event stream.
///
/// Content blocks are addressed by index; tool-use blocks are mapped back
/// to their ids. Usage from `message_start` and `message_delta` is merged
/// so each emitted figure is cumulative.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    sse: SseParser,
    tool_blocks: HashMap<u32, String>,
    usage: TokenUsage,
}

impl AnthropicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(&mut self, event: SseEvent) -> Result<Vec<Delta>> {
        let parsed: StreamEvent = serde_json::from_str(&event.data)
            .map_err(|e| PiError::Decode(format!("stream event: {e}")))?;

        let deltas = match parsed {
            StreamEvent::MessageStart { message } => match message.usage {
                Some(usage) => {
                    usage.merge_into(&mut self.usage);
                    vec![Delta::Usage(self.usage)]
                }
                None => Vec::new(),
            },
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ApiResponseBlock::ToolUse { id, name, .. } => {
                    self.tool_blocks.insert(index, id.clone());
                    vec![Delta::ToolCall {
                        id,
                        name: Some(name),
                        arguments: None,
                    }]
                }
                ApiResponseBlock::Text { text } if !text.is_empty() => vec![Delta::Text(text)],
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => vec![Delta::Text(text)],
                BlockDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => {
                    let id = self.tool_blocks.get(&index).cloned().ok_or_else(|| {
                        PiError::Decode(format!("input delta for unknown block {index}"))
                    })?;
                    vec![Delta::ToolCall {
                        id,
                        name: None,
                        arguments: Some(partial_json),
                    }]
                }
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockStop { index } => self
                .tool_blocks
                .get(&index)
                .map(|id| Delta::ToolCallComplete { id: id.clone() })
                .into_iter()
                .collect(),
            StreamEvent::MessageDelta { delta, usage } => {
                let mut deltas = Vec::new();
                if let Some(usage) = usage {
                    usage.merge_into(&mut self.usage);
                    deltas.push(Delta::Usage(self.usage));
                }
                if let Some(reason) = delta.stop_reason {
                    deltas.push(Delta::Stop(stop_reason(&reason)));
                }
                deltas
            }
            StreamEvent::MessageStop => vec![Delta::Done],
            StreamEvent::Error { error } => {
                return Err(PiError::Provider {
                    status: None,
                    message: format!("{}: {}", error.error_type, error.message),
                });
            }
            StreamEvent::Ignored => Vec::new(),
        };
        Ok(deltas)
    }
}

impl FrameDecoder for AnthropicDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Delta>> {
        let mut deltas = Vec::new();
        for event in self.sse.push(chunk)? {
            deltas.extend(self.event(event)?);
        }
        Ok(deltas)
    }

    fn finish(&mut self) -> Result<Vec<Delta>> {
        match self.sse.finish()? {
            Some(event) => self.event(event),
            None => Ok(Vec::new()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic messages provider.
#[derive(Clone)]
pub struct AnthropicProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    auth: AnthropicAuth,
}

impl AnthropicProvider {
    pub fn new(auth: AnthropicAuth) -> Self {
        Self {
            name: "anthropic".into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
            auth,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Share a connection pool with other providers.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn post(&self, body: &ApiRequest<'_>) -> RequestBuilder {
        let req = self
            .client
            .post(endpoint(&self.base_url, MESSAGES_PATH))
            .header("anthropic-version", API_VERSION)
            .json(body);
        self.auth.apply_headers(req)
    }
}

impl fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish()
    }
}

impl fmt::Display for AnthropicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, auth={})", self.name, self.base_url, self.auth)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::ALL
    }

    #[instrument(skip_all, fields(provider = %self.name, model = %request.model.id))]
    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ChatResponse> {
        let body = build_request(&request, false);
        let response = http::send(self.post(&body)).await?;
        let response = response_from_api(http::read_json(response).await?);
        debug!(usage = ?response.usage, stop = ?response.stop_reason, "completion received");
        Ok(response)
    }

    #[instrument(skip_all, fields(provider = %self.name, model = %request.model.id))]
    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ChatStream> {
        let pending = self
            .post(&build_request(&request, true))
            .header("accept", "text/event-stream");
        let connect = async move {
            let response = http::send(pending).await?;
            Ok::<_, PiError>(http::deltas(response, AnthropicDecoder::new()))
        };
        Ok(normalize(connect, request.options))
    }
}
