//! Model catalog.
//!
//! Descriptors are keyed by (provider, model). The catalog is built at
//! startup and then shared read-only behind an `Arc`.

use crate::cost::TokenCost;
use crate::model::{ModelId, ProviderId};
use crate::{PiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Wire protocol family a model is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKind {
    #[serde(rename = "openai-completions")]
    OpenAiCompletions,
    #[serde(rename = "anthropic-messages")]
    AnthropicMessages,
}

impl ApiKind {
    /// Environment variable consulted when no key is configured.
    pub fn default_key_env(self) -> &'static str {
        match self {
            Self::OpenAiCompletions => "OPENAI_API_KEY",
            Self::AnthropicMessages => "ANTHROPIC_API_KEY",
        }
    }
}

/// What a model can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default = "yes")]
    pub streaming: bool,
    #[serde(default = "yes")]
    pub tools: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub vision: bool,
}

fn yes() -> bool {
    true
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            tools: true,
            reasoning: false,
            vision: false,
        }
    }
}

/// Static metadata about one model from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub provider: ProviderId,
    pub id: ModelId,
    #[serde(default)]
    pub name: String,
    pub api: ApiKind,
    pub context_window: u32,
    #[serde(default)]
    pub max_output_tokens: u32,
    #[serde(flatten)]
    pub capabilities: ModelCapabilities,
    /// `None` means cost cannot be computed for this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<TokenCost>,
}

impl ModelDescriptor {
    pub fn new(provider: ProviderId, id: ModelId, api: ApiKind, context_window: u32) -> Self {
        Self {
            name: id.to_string(),
            provider,
            id,
            api,
            context_window,
            max_output_tokens: 0,
            capabilities: ModelCapabilities::default(),
            pricing: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_pricing(mut self, pricing: TokenCost) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn supports_streaming(&self) -> bool {
        self.capabilities.streaming
    }

    pub fn supports_tools(&self) -> bool {
        self.capabilities.tools
    }
}

/// Registry of model descriptors.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: BTreeMap<ProviderId, BTreeMap<ModelId, ModelDescriptor>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. An existing entry for the same key is left intact.
    pub fn register(&mut self, descriptor: ModelDescriptor) -> Result<()> {
        let models = self.models.entry(descriptor.provider.clone()).or_default();
        match models.entry(descriptor.id.clone()) {
            Entry::Occupied(_) => Err(PiError::DuplicateModel {
                provider: descriptor.provider.into_string(),
                model: descriptor.id.into_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Register every descriptor, stopping at the first duplicate.
    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Result<()> {
        descriptors.into_iter().try_for_each(|d| self.register(d))
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Result<&ModelDescriptor> {
        self.models
            .get(provider)
            .and_then(|models| models.get(model))
            .ok_or_else(|| PiError::UnknownModel {
                provider: provider.to_string(),
                model: model.to_string(),
            })
    }

    pub fn contains(&self, provider: &str, model: &str) -> bool {
        self.lookup(provider, model).is_ok()
    }

    /// All descriptors, sorted by provider then model.
    pub fn all(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values().flat_map(|models| models.values())
    }

    pub fn for_provider<'a>(&'a self, provider: &str) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        self.models
            .get(provider)
            .into_iter()
            .flat_map(|models| models.values())
    }

    pub fn len(&self) -> usize {
        self.models.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starter set of well-known models.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for descriptor in builtin_models() {
            // Static table, keys are distinct.
            let _ = catalog.register(descriptor);
        }
        catalog
    }
}

fn builtin_models() -> Vec<ModelDescriptor> {
    let entry = |provider: &str, id: &str, api, name: &str, ctx, max, vision, reasoning| {
        let provider = ProviderId::new(provider).ok()?;
        let id = ModelId::new(id).ok()?;
        Some(
            ModelDescriptor::new(provider, id, api, ctx)
                .with_name(name)
                .with_max_output_tokens(max)
                .with_capabilities(ModelCapabilities {
                    streaming: true,
                    tools: true,
                    reasoning,
                    vision,
                }),
        )
    };

    [
        entry("openai", "gpt-4o-mini", ApiKind::OpenAiCompletions, "GPT-4o mini", 128_000, 16_384, true, false)
            .map(|d| d.with_pricing(TokenCost::new(0.15, 0.6).with_cached_input(0.075))),
        entry("openai", "gpt-4o", ApiKind::OpenAiCompletions, "GPT-4o", 128_000, 16_384, true, false)
            .map(|d| d.with_pricing(TokenCost::new(2.5, 10.0).with_cached_input(1.25))),
        entry("anthropic", "claude-sonnet-4-5", ApiKind::AnthropicMessages, "Claude Sonnet 4.5", 200_000, 64_000, true, true)
            .map(|d| d.with_pricing(TokenCost::new(3.0, 15.0).with_cached_input(0.3))),
        entry("anthropic", "claude-haiku-4-5", ApiKind::AnthropicMessages, "Claude Haiku 4.5", 200_000, 64_000, true, true)
            .map(|d| d.with_pricing(TokenCost::new(1.0, 5.0).with_cached_input(0.1))),
        entry("ollama", "llama3.1:8b", ApiKind::OpenAiCompletions, "Llama 3.1 8B (Ollama)", 128_000, 8_192, false, false),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(provider: &str, model: &str) -> ModelDescriptor {
        ModelDescriptor::new(
            ProviderId::new(provider).unwrap(),
            ModelId::new(model).unwrap(),
            ApiKind::OpenAiCompletions,
            8_000,
        )
    }

    #[test]
    fn lookup_unknown_model() {
        let catalog = ModelCatalog::new();
        assert_eq!(
            catalog.lookup("openai", "nope").unwrap_err(),
            PiError::UnknownModel {
                provider: "openai".into(),
                model: "nope".into()
            }
        );
    }

    #[test]
    fn duplicate_register_keeps_first() {
        let mut catalog = ModelCatalog::new();
        catalog
            .register(descriptor("acme", "m1").with_name("first"))
            .unwrap();
        let err = catalog
            .register(descriptor("acme", "m1").with_name("second"))
            .unwrap_err();
        assert!(matches!(err, PiError::DuplicateModel { .. }));
        assert_eq!(catalog.lookup("acme", "m1").unwrap().name, "first");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn same_model_id_under_two_providers() {
        let mut catalog = ModelCatalog::new();
        catalog.register(descriptor("a", "m")).unwrap();
        catalog.register(descriptor("b", "m")).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.for_provider("b").count(), 1);
    }

    #[test]
    fn builtin_is_sorted_and_seeded() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.len(), 5);
        let keys: Vec<String> = catalog
            .all()
            .map(|d| format!("{}/{}", d.provider, d.id))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let local = catalog.lookup("ollama", "llama3.1:8b").unwrap();
        assert!(local.pricing.is_none());
        assert!(catalog.lookup("openai", "gpt-4o-mini").unwrap().pricing.is_some());
    }

    #[test]
    fn descriptor_from_toml_shape() {
        let d: ModelDescriptor = serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "id": "gpt-4.1-mini",
            "api": "openai-completions",
            "context_window": 1047576,
            "tools": false,
            "pricing": {"input": 0.4, "output": 1.6, "cached_input": 0.1}
        }))
        .unwrap();
        assert!(d.supports_streaming());
        assert!(!d.supports_tools());
        assert_eq!(d.pricing.unwrap().cached_input, Some(0.1));
    }
}
