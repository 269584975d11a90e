//! Runtime configuration loaded from TOML.
//!
//! ```toml
//! [agent]
//! max_turns = 16
//! call_timeout_secs = 120
//! stream = true
//!
//! [providers.openai]
//! api = "openai-completions"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [[models]]
//! provider = "openai"
//! id = "gpt-4.1-mini"
//! api = "openai-completions"
//! context_window = 1047576
//! pricing = { input = 0.4, output = 1.6, cached_input = 0.1 }
//! ```

use crate::agent::AgentConfig;
use crate::catalog::{ApiKind, ModelCatalog, ModelDescriptor};
use crate::{PiError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub agent: AgentSettings,

    /// Provider adapters keyed by provider id.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,

    /// Catalog entries added on top of the builtin set.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Loop bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    pub call_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

fn default_max_turns() -> usize {
    16
}

fn default_max_parallel_tools() -> usize {
    8
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            call_timeout_secs: None,
            tool_timeout_secs: None,
            max_parallel_tools: default_max_parallel_tools(),
            stream: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// One provider adapter.
#[derive(Clone, Deserialize)]
pub struct ProviderSettings {
    pub api: ApiKind,

    /// Adapter default when unset.
    pub base_url: Option<String>,

    /// Explicit API key. Mutually exclusive with `oauth_token`.
    pub api_key: Option<String>,

    /// OAuth bearer token (anthropic only). Mutually exclusive with `api_key`.
    pub oauth_token: Option<String>,

    /// Environment variable holding the key; defaults per `api`.
    pub api_key_env: Option<String>,

    /// The endpoint needs no credentials (e.g. a local server).
    #[serde(default)]
    pub keyless: bool,
}

/// Resolved provider credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    OauthToken(String),
    None,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::OauthToken(_) => f.write_str("OauthToken(<redacted>)"),
            Self::None => f.write_str("None"),
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api", &self.api)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("oauth_token", &self.oauth_token.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("keyless", &self.keyless)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new(api: ApiKind) -> Self {
        Self {
            api,
            base_url: None,
            api_key: None,
            oauth_token: None,
            api_key_env: None,
            keyless: false,
        }
    }

    /// Resolve credentials from the process environment.
    pub fn resolve_credential(&self) -> Result<Credential> {
        self.resolve_credential_with(|name| std::env::var(name).ok())
    }

    /// Resolve credentials: explicit value, then `api_key_env`, then the
    /// api kind's default variable.
    pub fn resolve_credential_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Credential> {
        match (&self.api_key, &self.oauth_token) {
            (Some(_), Some(_)) => {
                return Err(PiError::Config(
                    "set either api_key or oauth_token, not both".into(),
                ));
            }
            (Some(key), None) => return Ok(Credential::ApiKey(key.clone())),
            (None, Some(token)) => return Ok(Credential::OauthToken(token.clone())),
            (None, None) => {}
        }

        let var = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.api.default_key_env());
        match lookup(var).filter(|v| !v.trim().is_empty()) {
            Some(key) => Ok(Credential::ApiKey(key)),
            None if self.keyless => Ok(Credential::None),
            None => Err(PiError::Config(format!(
                "no credentials: set api_key or the {var} environment variable"
            ))),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PiError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| PiError::Config(format!("failed to parse config: {e}")))
    }

    /// Builtin catalog extended with `[[models]]`.
    pub fn catalog(&self) -> Result<ModelCatalog> {
        let mut catalog = ModelCatalog::builtin();
        catalog.extend(self.models.iter().cloned())?;
        Ok(catalog)
    }

    pub fn agent_config(&self) -> AgentConfig {
        let agent = &self.agent;
        AgentConfig {
            max_turns: agent.max_turns,
            call_timeout: agent.call_timeout_secs.map(Duration::from_secs),
            tool_timeout: agent.tool_timeout_secs.map(Duration::from_secs),
            max_parallel_tools: agent.max_parallel_tools,
            stream: agent.stream,
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[agent]
max_turns = 4
call_timeout_secs = 30
stream = true

[providers.openai]
api = "openai-completions"
api_key_env = "MY_OPENAI_KEY"

[providers.ollama]
api = "openai-completions"
base_url = "http://localhost:11434"
keyless = true

[[models]]
provider = "openai"
id = "gpt-4.1-mini"
name = "GPT-4.1 mini"
api = "openai-completions"
context_window = 1047576
max_output_tokens = 32768
pricing = { input = 0.4, output = 1.6, cached_input = 0.1 }
"#;

    #[test]
    fn parses_sample() {
        let config = RuntimeConfig::parse(SAMPLE).unwrap();
        let agent = config.agent_config();
        assert_eq!(agent.max_turns, 4);
        assert_eq!(agent.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(agent.max_parallel_tools, 8);
        assert!(agent.stream);
        assert_eq!(config.providers.len(), 2);

        let catalog = config.catalog().unwrap();
        let added = catalog.lookup("openai", "gpt-4.1-mini").unwrap();
        assert_eq!(added.max_output_tokens, 32768);
        assert!(added.supports_tools());
    }

    #[test]
    fn defaults_when_empty() {
        let config = RuntimeConfig::parse("").unwrap();
        assert_eq!(config.agent_config(), AgentConfig::default());
        assert_eq!(config.catalog().unwrap().len(), 5);
    }

    #[test]
    fn duplicate_catalog_entry_fails() {
        let config = RuntimeConfig::parse(
            r#"
[[models]]
provider = "openai"
id = "gpt-4o"
api = "openai-completions"
context_window = 1
"#,
        )
        .unwrap();
        assert!(matches!(
            config.catalog(),
            Err(PiError::DuplicateModel { .. })
        ));
    }

    #[test]
    fn credential_resolution_order() {
        let env = |name: &str| (name == "MY_OPENAI_KEY").then(|| "from-env".to_string());

        let mut settings = ProviderSettings::new(ApiKind::OpenAiCompletions);
        settings.api_key_env = Some("MY_OPENAI_KEY".into());
        assert_eq!(
            settings.resolve_credential_with(env).unwrap(),
            Credential::ApiKey("from-env".into())
        );

        settings.api_key = Some("explicit".into());
        assert_eq!(
            settings.resolve_credential_with(env).unwrap(),
            Credential::ApiKey("explicit".into())
        );

        let defaulted = ProviderSettings::new(ApiKind::AnthropicMessages);
        let err = defaulted.resolve_credential_with(|_| None).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn keyless_and_ambiguous() {
        let mut settings = ProviderSettings::new(ApiKind::OpenAiCompletions);
        settings.keyless = true;
        assert_eq!(
            settings.resolve_credential_with(|_| None).unwrap(),
            Credential::None
        );

        settings.api_key = Some("a".into());
        settings.oauth_token = Some("b".into());
        assert!(matches!(
            settings.resolve_credential_with(|_| None),
            Err(PiError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut settings = ProviderSettings::new(ApiKind::OpenAiCompletions);
        settings.api_key = Some("sk-secret".into());
        assert!(!format!("{settings:?}").contains("sk-secret"));
        assert!(!format!("{:?}", Credential::ApiKey("sk-secret".into())).contains("sk-secret"));
    }
}
