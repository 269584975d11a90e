//! Scripted provider for tests.
//!
//! [`ScriptedProvider`] is a queue-based fake: tests push the responses
//! and stream scripts it should produce, then inspect the requests it
//! received. Streams go through the real [`normalize`] pump, so
//! cancellation, deadlines and event ordering behave as they do for a
//! network provider.

use crate::error::Operation;
use crate::model::{ChatResponse, Context, ModelId, Part, ProviderId, StopReason, TokenUsage};
use crate::provider::{Provider, ProviderCapabilities, ProviderRequest};
use crate::stream::{ChatStream, Delta, normalize};
use crate::{PiError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt, future, stream};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One step of a stream script.
#[derive(Debug, Clone)]
pub enum Step {
    Delta(Delta),
    Sleep(Duration),
    /// Transport failure at this point.
    Fail(PiError),
    /// Never yield again.
    Hang,
}

/// What a scripted stream produces, in order.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    steps: Vec<Step>,
    delay: Duration,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a complete response as deltas, ending with the wire marker.
    ///
    /// Text is split into single characters.
    pub fn from_response(response: &ChatResponse) -> Self {
        let mut script = Self::new();
        for part in &response.message.parts {
            match part {
                Part::Text { text } => {
                    for ch in text.chars() {
                        script = script.text(ch.to_string());
                    }
                }
                Part::ToolCall(call) => {
                    script = script.tool_call(&call.id, &call.name, &call.arguments.to_string());
                }
                Part::ToolResult(_) => {}
            }
        }
        script
            .usage(response.usage)
            .stop(response.stop_reason)
            .done()
    }

    /// Sleep this long before every step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn delta(self, delta: Delta) -> Self {
        self.step(Step::Delta(delta))
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.delta(Delta::Text(text.into()))
    }

    pub fn tool_call(self, id: &str, name: &str, arguments: &str) -> Self {
        self.delta(Delta::ToolCall {
            id: id.into(),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
        })
    }

    pub fn usage(self, usage: TokenUsage) -> Self {
        self.delta(Delta::Usage(usage))
    }

    pub fn stop(self, reason: StopReason) -> Self {
        self.delta(Delta::Stop(reason))
    }

    pub fn done(self) -> Self {
        self.delta(Delta::Done)
    }

    pub fn sleep(self, duration: Duration) -> Self {
        self.step(Step::Sleep(duration))
    }

    pub fn fail(self, err: PiError) -> Self {
        self.step(Step::Fail(err))
    }

    pub fn hang(self) -> Self {
        self.step(Step::Hang)
    }

    fn into_deltas(self) -> impl Stream<Item = Result<Delta>> + Send + 'static {
        let delay = self.delay;
        stream::iter(self.steps)
            .then(move |step| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match step {
                    Step::Delta(delta) => Some(Ok(delta)),
                    Step::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                    Step::Fail(err) => Some(Err(err)),
                    Step::Hang => future::pending().await,
                }
            })
            .filter_map(future::ready)
    }
}

/// A request as seen by the provider.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: Operation,
    pub provider: ProviderId,
    pub model: ModelId,
    pub context: Context,
    pub tool_names: Vec<String>,
}

/// Queue-based fake provider.
///
/// `complete` pops from the response queue. `stream` pops a script, or
/// replays the next queued response when no script is queued. An empty
/// queue is reported as a provider error.
pub struct ScriptedProvider {
    name: String,
    capabilities: ProviderCapabilities,
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    streams: Mutex<VecDeque<Result<StreamScript>>>,
    complete_delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::named("scripted")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderCapabilities::ALL,
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            complete_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Delay every `complete` call.
    pub fn with_complete_delay(mut self, delay: Duration) -> Self {
        self.complete_delay = delay;
        self
    }

    pub fn with_response(self, response: ChatResponse) -> Self {
        self.push_response(response);
        self
    }

    pub fn with_stream(self, script: StreamScript) -> Self {
        self.push_stream(script);
        self
    }

    pub fn push_response(&self, response: ChatResponse) {
        lock(&self.responses).push_back(Ok(response));
    }

    pub fn push_error(&self, err: PiError) {
        lock(&self.responses).push_back(Err(err));
    }

    pub fn push_stream(&self, script: StreamScript) {
        lock(&self.streams).push_back(Ok(script));
    }

    /// Fail the next `stream` call before any event.
    pub fn push_stream_error(&self, err: PiError) {
        lock(&self.streams).push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn record(&self, operation: Operation, request: &ProviderRequest<'_>) {
        lock(&self.calls).push(RecordedCall {
            operation,
            provider: request.model.provider.clone(),
            model: request.model.id.clone(),
            context: request.context.clone(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
    }

    fn next_response(&self) -> Result<ChatResponse> {
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(PiError::provider("no scripted response left")))
    }

    fn next_script(&self) -> Result<StreamScript> {
        if let Some(script) = lock(&self.streams).pop_front() {
            return script;
        }
        self.next_response()
            .map(|response| StreamScript::from_response(&response))
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("queued_responses", &lock(&self.responses).len())
            .field("queued_streams", &lock(&self.streams).len())
            .field("recorded_calls", &lock(&self.calls).len())
            .finish()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ChatResponse> {
        self.record(Operation::Complete, &request);
        if !self.complete_delay.is_zero() {
            tokio::time::sleep(self.complete_delay).await;
        }
        self.next_response()
    }

    async fn stream(&self, request: ProviderRequest<'_>) -> Result<ChatStream> {
        self.record(Operation::Stream, &request);
        let script = self.next_script()?;
        Ok(normalize(
            async move { Ok(script.into_deltas()) },
            request.options,
        ))
    }
}
