//! Pi runtime: provider abstraction, streaming normalization, cost
//! accounting and the agent tool loop.
//!
//! This crate performs no network I/O. Concrete providers live in
//! `pi-providers` and plug in through the [`Provider`] trait.
//!
//! # Overview
//!
//! - **ModelCatalog**: descriptors keyed by (provider, model), with pricing.
//! - **ProviderHub**: provider id to [`Provider`] implementation.
//! - **AiClient**: resolves models, checks capabilities, calls providers
//!   and attaches cost.
//! - **ChatStream**: canonical, finite, cancellable event stream.
//! - **Agent**: the tool-calling loop.
//!
//! # Example
//!
//! ```ignore
//! use pi_runtime::{Agent, AiClient, Context, ModelCatalog, ProviderHub};
//!
//! # async fn example(hub: ProviderHub) -> pi_runtime::Result<()> {
//! let client = AiClient::new(ModelCatalog::builtin(), hub);
//! let model = client.model("openai", "gpt-4o-mini")?;
//! let outcome = Agent::new(client, model)
//!     .run(Context::from_user("What is 2+2?"))
//!     .await;
//! let (response, _context) = outcome.into_result()?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod catalog;
pub mod client;
pub mod config;
pub mod cost;
mod error;
pub mod hub;
pub mod mock;
pub mod model;
pub mod provider;
pub mod stream;
pub mod tools;
pub mod transcript;

// Error taxonomy
pub use error::{ErrorKind, ErrorReport, Operation, PiError, Result};

// Data model
pub use model::{
    ChatMessage, ChatResponse, Context, ModelId, Part, ProviderId, Role, StopReason, TokenUsage,
    ToolCall, ToolDefinition, ToolResult,
};

// Catalog, cost and providers
pub use catalog::{ApiKind, ModelCapabilities, ModelCatalog, ModelDescriptor};
pub use cost::{CostBreakdown, TokenCost, estimate_usd};
pub use hub::ProviderHub;
pub use provider::{ChatOptions, Provider, ProviderCapabilities, ProviderRequest};

// Streaming
pub use stream::{ChatStream, ChatStreamEvent, Delta, FrameDecoder};

// Client and agent loop
pub use agent::{Agent, AgentConfig, AgentEvent, AgentState, LoopOutcome};
pub use client::AiClient;
pub use tools::{EmptyToolExecutor, ToolError, ToolExecutor, tool_fn};

// Configuration and transcripts
pub use config::{Credential, ProviderSettings, RuntimeConfig};
pub use transcript::{Record, RecordKind, RunId, Transcript};

pub use tokio_util::sync::CancellationToken;
