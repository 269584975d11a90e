//! HTTP provider adapters for `pi-runtime`.
//!
//! Each adapter implements [`pi_runtime::Provider`] for one wire protocol:
//!
//! - [`OpenAiProvider`]: chat completions, also used for OpenAI-compatible
//!   local servers.
//! - [`AnthropicProvider`]: the messages API.
//!
//! Streaming bodies are framed by [`sse::SseParser`] and decoded into
//! runtime deltas by a per-protocol [`pi_runtime::FrameDecoder`].
//!
//! # Example
//!
//! ```ignore
//! use pi_runtime::{Agent, Context, RuntimeConfig};
//!
//! # async fn example() -> pi_runtime::Result<()> {
//! let config = RuntimeConfig::load("pi.toml")?;
//! let client = pi_providers::build_client(&config)?;
//! let model = client.model("anthropic", "claude-haiku-4-5")?;
//! let outcome = Agent::new(client, model)
//!     .with_config(config.agent_config())
//!     .run(Context::from_user("What is 2+2?"))
//!     .await;
//! # Ok(())
//! # }
//! ```

mod anthropic;
mod factory;
mod http;
mod openai;
pub mod sse;

pub use anthropic::{AnthropicAuth, AnthropicDecoder, AnthropicProvider};
pub use factory::{build_client, build_hub, build_hub_with};
pub use openai::{OpenAiDecoder, OpenAiProvider};
