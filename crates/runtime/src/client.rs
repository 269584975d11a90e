//! Unified client over the catalog and hub.

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::cost::estimate_usd;
use crate::error::Operation;
use crate::hub::ProviderHub;
use crate::model::{ChatResponse, Context, ToolDefinition};
use crate::provider::{ChatOptions, Provider, ProviderRequest};
use crate::stream::ChatStream;
use crate::{PiError, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Entry point for model calls.
///
/// Cheap to clone; the catalog and hub are shared across conversations.
#[derive(Debug, Clone)]
pub struct AiClient {
    catalog: Arc<ModelCatalog>,
    hub: Arc<ProviderHub>,
}

impl AiClient {
    pub fn new(catalog: ModelCatalog, hub: ProviderHub) -> Self {
        Self::from_shared(Arc::new(catalog), Arc::new(hub))
    }

    pub fn from_shared(catalog: Arc<ModelCatalog>, hub: Arc<ProviderHub>) -> Self {
        Self { catalog, hub }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn hub(&self) -> &ProviderHub {
        &self.hub
    }

    /// Resolve a model.
    ///
    /// Fails with `UnknownProvider` when no provider is bound under
    /// `provider`, otherwise with `UnknownModel` when the catalog lacks it.
    pub fn model(&self, provider: &str, model: &str) -> Result<ModelDescriptor> {
        if !self.hub.contains(provider) {
            return Err(PiError::UnknownProvider(provider.to_string()));
        }
        self.catalog.lookup(provider, model).cloned()
    }

    /// One non-streaming round trip, with cost attached when priced.
    ///
    /// Races the provider against `options.cancel` and `options.timeout`;
    /// the losing provider future is dropped, releasing its connection.
    #[instrument(skip_all, fields(provider = %model.provider, model = %model.id))]
    pub async fn complete(
        &self,
        model: &ModelDescriptor,
        context: &Context,
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        let provider = self.dispatch_target(model, tools, Operation::Complete)?;
        let request = ProviderRequest {
            model,
            context,
            tools,
            options,
        };

        let call = provider.complete(request);
        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match options.timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    after
                }
                None => std::future::pending().await,
            }
        };

        let mut response = tokio::select! {
            biased;
            _ = cancelled => return Err(PiError::Cancelled),
            after = expired => return Err(PiError::Timeout { after }),
            response = call => response?,
        };
        response.cost = estimate_usd(&response.usage, model.pricing.as_ref());
        debug!(
            stop_reason = ?response.stop_reason,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "completion finished"
        );
        Ok(response)
    }

    /// One streaming round trip.
    ///
    /// Returns `Err` only for capability failures. Provider failures,
    /// including ones before the first byte, arrive as the stream's
    /// terminal `Error` event. Cost is attached to the `End` response.
    #[instrument(skip_all, fields(provider = %model.provider, model = %model.id))]
    pub async fn stream(
        &self,
        model: &ModelDescriptor,
        context: &Context,
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let provider = self.dispatch_target(model, tools, Operation::Stream)?;
        let request = ProviderRequest {
            model,
            context,
            tools,
            options,
        };

        let stream = match provider.stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(error = %err, "stream failed before first event");
                ChatStream::failed(&err)
            }
        };

        let pricing = model.pricing;
        Ok(stream.map_end(move |mut response| {
            response.cost = estimate_usd(&response.usage, pricing.as_ref());
            response
        }))
    }

    /// Look up the provider and check it can serve this call.
    fn dispatch_target(
        &self,
        model: &ModelDescriptor,
        tools: &[ToolDefinition],
        operation: Operation,
    ) -> Result<Arc<dyn Provider>> {
        let provider = self.hub.get(model.provider.as_str())?;
        let unsupported = |operation| PiError::UnsupportedOperation {
            provider: model.provider.to_string(),
            operation,
        };

        if !provider.capabilities().supports(operation) {
            return Err(unsupported(operation));
        }
        if operation == Operation::Stream && !model.supports_streaming() {
            return Err(unsupported(Operation::Stream));
        }
        if !tools.is_empty() && !model.supports_tools() {
            return Err(unsupported(Operation::Tools));
        }
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ApiKind;
    use crate::cost::TokenCost;
    use crate::mock::ScriptedProvider;
    use crate::model::{ChatMessage, ModelId, ProviderId, StopReason, TokenUsage};
    use crate::provider::ProviderCapabilities;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new(
            ProviderId::new("mock").unwrap(),
            ModelId::new("m").unwrap(),
            ApiKind::OpenAiCompletions,
            8_000,
        )
        .with_pricing(TokenCost::new(1.0, 2.0))
    }

    fn reply(text: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(text),
            usage: TokenUsage::new(10, 1),
            cost: None,
            stop_reason: StopReason::Stop,
        }
    }

    fn client(provider: ScriptedProvider) -> AiClient {
        let mut catalog = ModelCatalog::new();
        catalog.register(descriptor()).unwrap();
        let hub = ProviderHub::new()
            .with(ProviderId::new("mock").unwrap(), provider)
            .unwrap();
        AiClient::new(catalog, hub)
    }

    #[test]
    fn model_reports_unknown_provider_first() {
        let client = client(ScriptedProvider::new());
        assert_eq!(
            client.model("nope", "m").unwrap_err(),
            PiError::UnknownProvider("nope".into())
        );
        assert!(matches!(
            client.model("mock", "nope"),
            Err(PiError::UnknownModel { .. })
        ));
        assert_eq!(client.model("mock", "m").unwrap().id.as_str(), "m");
    }

    #[tokio::test]
    async fn complete_attaches_cost() {
        let client = client(ScriptedProvider::new().with_response(reply("4")));
        let model = client.model("mock", "m").unwrap();
        let response = client
            .complete(&model, &Context::from_user("2+2?"), &[], &ChatOptions::default())
            .await
            .unwrap();
        let cost = response.cost.unwrap();
        assert!((cost.total - 12e-6).abs() < 1e-15);
    }

    #[tokio::test]
    async fn unsupported_operation_is_checked_before_dispatch() {
        let provider = ScriptedProvider::new().with_capabilities(ProviderCapabilities {
            complete: false,
            stream: true,
        });
        let client = client(provider);
        let model = client.model("mock", "m").unwrap();
        let err = client
            .complete(&model, &Context::from_user("hi"), &[], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PiError::UnsupportedOperation {
                operation: Operation::Complete,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancelled_complete() {
        let client = client(
            ScriptedProvider::new()
                .with_complete_delay(Duration::from_secs(60))
                .with_response(reply("late")),
        );
        let model = client.model("mock", "m").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let options = ChatOptions::default().with_cancel(token);
        let err = client
            .complete(&model, &Context::from_user("hi"), &[], &options)
            .await
            .unwrap_err();
        assert_eq!(err, PiError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_deadline_is_timeout() {
        let client = client(
            ScriptedProvider::new()
                .with_complete_delay(Duration::from_secs(60))
                .with_response(reply("late")),
        );
        let model = client.model("mock", "m").unwrap();
        let options = ChatOptions::default().with_timeout(Duration::from_secs(1));
        let err = client
            .complete(&model, &Context::from_user("hi"), &[], &options)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PiError::Timeout {
                after: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn stream_connect_failure_becomes_error_event() {
        let provider = ScriptedProvider::new();
        provider.push_stream_error(PiError::Provider {
            status: Some(500),
            message: "boom".into(),
        });
        let client = client(provider);
        let model = client.model("mock", "m").unwrap();
        let err = client
            .stream(&model, &Context::from_user("hi"), &[], &ChatOptions::default())
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Provider);
    }
}
