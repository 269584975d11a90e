//! OpenAI chat-completions adapter.
//!
//! Also serves OpenAI-compatible servers such as Ollama, which take the
//! same wire format and usually need no key.

use crate::http::{self, endpoint, parse_arguments};
use crate::sse::{SseEvent, SseParser};
use async_trait::async_trait;
use pi_runtime::stream::normalize;
use pi_runtime::{
    ChatMessage, ChatResponse, ChatStream, Delta, FrameDecoder, Part, PiError, Provider,
    ProviderCapabilities, ProviderRequest, Result, Role, StopReason, TokenUsage, ToolCall,
    ToolDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

// Wire types

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ApiFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl From<&ApiUsage> for TokenUsage {
    /// Cached prompt tokens are reported inside `prompt_tokens`; split them out.
    fn from(usage: &ApiUsage) -> Self {
        let cached = usage
            .prompt_tokens_details
            .as_ref()
            .map_or(0, |d| d.cached_tokens)
            .min(usage.prompt_tokens);
        TokenUsage::new(usage.prompt_tokens - cached, usage.completion_tokens)
            .with_cached(cached)
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn stop_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::Length,
        "tool_calls" | "function_call" => StopReason::ToolCalls,
        "content_filter" => StopReason::Error,
        _ => StopReason::Stop,
    }
}

// Conversion

/// One canonical message can expand to several wire messages: each tool
/// result travels as its own `tool` message.
fn message_to_api(message: &ChatMessage) -> Vec<ApiMessage> {
    let plain = |role, content| ApiMessage {
        role,
        content: Some(content),
        tool_calls: Vec::new(),
        tool_call_id: None,
    };
    match message.role {
        Role::System => vec![plain("system", message.text())],
        Role::User => vec![plain("user", message.text())],
        Role::Assistant => {
            let text = message.text();
            let tool_calls: Vec<ApiToolCall> = message
                .tool_calls()
                .into_iter()
                .map(|call| ApiToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: ApiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();
            let content = (!text.is_empty() || tool_calls.is_empty()).then_some(text);
            vec![ApiMessage {
                role: "assistant",
                content,
                tool_calls,
                tool_call_id: None,
            }]
        }
        Role::Tool => message
            .tool_results()
            .map(|result| ApiMessage {
                role: "tool",
                content: Some(result.content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(result.call_id.clone()),
            })
            .collect(),
    }
}

fn tool_to_api(tool: &ToolDefinition) -> ApiTool<'_> {
    ApiTool {
        tool_type: "function",
        function: ApiFunction {
            name: &tool.name,
            description: &tool.description,
            parameters: &tool.parameters,
        },
    }
}

fn build_request<'a>(request: &ProviderRequest<'a>, stream: bool) -> ApiRequest<'a> {
    let tools: Vec<_> = request.tools.iter().map(tool_to_api).collect();
    ApiRequest {
        model: request.model.id.as_str(),
        messages: request
            .context
            .messages()
            .iter()
            .flat_map(message_to_api)
            .collect(),
        tool_choice: (!tools.is_empty()).then_some("auto"),
        tools,
        temperature: request.options.temperature,
        max_tokens: request.options.max_tokens_for(request.model),
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

fn response_from_api(response: ApiResponse) -> Result<ChatResponse> {
    let usage = response.usage.as_ref().map(TokenUsage::from).unwrap_or_default();
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PiError::Decode("response has no choices".into()))?;

    let mut parts = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        parts.push(Part::text(text));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        parts.push(Part::ToolCall(ToolCall {
            arguments: parse_arguments(&call.function.arguments)?,
            id: call.id,
            name: call.function.name,
        }));
    }
    let has_calls = parts.iter().any(|p| matches!(p, Part::ToolCall(_)));

    let stop_reason = match choice.finish_reason.as_deref() {
        Some(reason) => stop_reason(reason),
        None if has_calls => StopReason::ToolCalls,
        None => StopReason::Stop,
    };

    Ok(ChatResponse {
        message: ChatMessage::from_parts(Role::Assistant, parts),
        usage,
        cost: None,
        stop_reason,
    })
}

// Streaming

/// Decodes a chat-completions event stream.
///
/// Tool-call fragments after the first carry only an `index`; the decoder
/// maps it back to the id announced by the first fragment.
#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    sse: SseParser,
    ids: HashMap<u32, String>,
}

impl OpenAiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(&mut self, event: SseEvent) -> Result<Vec<Delta>> {
        if event.data.trim() == "[DONE]" {
            return Ok(vec![Delta::Done]);
        }
        let chunk: StreamChunk = serde_json::from_str(&event.data)
            .map_err(|e| PiError::Decode(format!("stream chunk: {e}")))?;
        if let Some(error) = chunk.error {
            return Err(PiError::Provider {
                status: None,
                message: error.message,
            });
        }

        let mut deltas = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                deltas.push(Delta::Text(text));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let id = match call.id.filter(|id| !id.is_empty()) {
                    Some(id) => {
                        self.ids.insert(call.index, id.clone());
                        id
                    }
                    None => self.ids.get(&call.index).cloned().ok_or_else(|| {
                        PiError::Decode(format!("tool call index {} has no id", call.index))
                    })?,
                };
                let (name, arguments) = call
                    .function
                    .map(|f| (f.name, f.arguments.filter(|a| !a.is_empty())))
                    .unwrap_or_default();
                deltas.push(Delta::ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            if let Some(reason) = choice.finish_reason {
                deltas.push(Delta::Stop(stop_reason(&reason)));
            }
        }
        if let Some(usage) = &chunk.usage {
            deltas.push(Delta::Usage(usage.into()));
        }
        Ok(deltas)
    }
}

impl FrameDecoder for OpenAiDecoder {
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

// Provider

/// Chat-completions provider.
#[derive(Clone)]
pub struct OpenAiProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "openai".into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: Some(api_key.into()),
        }
    }

    /// For local OpenAI-compatible servers that take no credentials.
    pub fn keyless(base_url: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into(),
            ..Self::new(String::new())
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

    fn post(&self, body: &ApiRequest<'_>) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(endpoint(&self.base_url, COMPLETIONS_PATH))
            .json(body);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.base_url)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
        let response = response_from_api(http::read_json(response).await?)?;
        debug!(usage = ?response.usage, stop = ?response.stop_reason, "completion received");
        Ok(response)
    }

    #[instrument(skip_all, fields(provider = %self.name, model = %request.model.id))]
    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ChatStream> {
        let pending = self.post(&build_request(&request, true));
        let connect = async move {
            let response = http::send(pending).await?;
            Ok::<_, PiError>(http::deltas(response, OpenAiDecoder::new()))
        };
        Ok(normalize(connect, request.options))
    }
}
