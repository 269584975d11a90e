//! Hub composition from configuration.

use crate::anthropic::{AnthropicAuth, AnthropicProvider};
use crate::openai::OpenAiProvider;
use pi_runtime::{
    AiClient, ApiKind, Credential, PiError, Provider, ProviderHub, ProviderId, ProviderSettings,
    Result, RuntimeConfig,
};
use std::sync::Arc;
use tracing::info;

/// Build a hub with one provider per `[providers.*]` entry.
///
/// Credentials are resolved from the process environment. All providers
/// share one connection pool.
pub fn build_hub(config: &RuntimeConfig) -> Result<ProviderHub> {
    build_hub_with(config, |name| std::env::var(name).ok())
}

/// [`build_hub`] with a custom environment lookup.
pub fn build_hub_with(
    config: &RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ProviderHub> {
    let client = reqwest::Client::new();
    let mut hub = ProviderHub::new();
    for (id, settings) in &config.providers {
        let credential = settings.resolve_credential_with(&lookup)?;
        let provider = build_provider(id, settings, credential, client.clone())?;
        info!(provider = %id, api = ?settings.api, "provider configured");
        hub.insert(ProviderId::new(id.as_str())?, provider)?;
    }
    Ok(hub)
}

/// Catalog and hub from one configuration.
pub fn build_client(config: &RuntimeConfig) -> Result<AiClient> {
    Ok(AiClient::new(config.catalog()?, build_hub(config)?))
}

fn build_provider(
    id: &str,
    settings: &ProviderSettings,
    credential: Credential,
    client: reqwest::Client,
) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match settings.api {
        ApiKind::OpenAiCompletions => {
            let provider = match credential {
                Credential::ApiKey(key) => OpenAiProvider::new(key),
                Credential::None => OpenAiProvider::keyless(crate::openai::DEFAULT_BASE_URL),
                Credential::OauthToken(_) => {
                    return Err(PiError::Config(format!(
                        "provider {id}: oauth_token is only supported for anthropic-messages"
                    )));
                }
            };
            let provider = provider.with_name(id).with_client(client);
            Arc::new(match &settings.base_url {
                Some(base) => provider.with_base_url(base.as_str()),
                None => provider,
            })
        }
        ApiKind::AnthropicMessages => {
            let auth = match credential {
                Credential::ApiKey(key) => AnthropicAuth::ApiKey(key),
                Credential::OauthToken(token) => AnthropicAuth::OauthToken(token),
                Credential::None => {
                    return Err(PiError::Config(format!(
                        "provider {id}: anthropic-messages needs credentials"
                    )));
                }
            };
            let provider = AnthropicProvider::new(auth)
                .with_name(id)
                .with_client(client);
            Arc::new(match &settings.base_url {
                Some(base) => provider.with_base_url(base.as_str()),
                None => provider,
            })
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[providers.openai]
api = "openai-completions"

[providers.anthropic]
api = "anthropic-messages"
oauth_token = "token"

[providers.ollama]
api = "openai-completions"
base_url = "http://localhost:11434"
keyless = true
"#;

    #[test]
    fn builds_every_configured_provider() {
        let config = RuntimeConfig::parse(CONFIG).unwrap();
        let hub = build_hub_with(&config, |name| {
            (name == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        let ids: Vec<&str> = hub.ids().into_iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["anthropic", "ollama", "openai"]);
        assert_eq!(hub.get("ollama").unwrap().name(), "ollama");
    }

    #[test]
    fn missing_key_is_config_error() {
        let config = RuntimeConfig::parse(CONFIG).unwrap();
        assert!(matches!(
            build_hub_with(&config, |_| None),
            Err(PiError::Config(_))
        ));
    }

    #[test]
    fn oauth_on_openai_is_rejected() {
        let config = RuntimeConfig::parse(
            r#"
[providers.openai]
api = "openai-completions"
oauth_token = "t"
"#,
        )
        .unwrap();
        assert!(matches!(
            build_hub_with(&config, |_| None),
            Err(PiError::Config(_))
        ));
    }

    #[test]
    fn client_resolves_configured_models() {
        let config = RuntimeConfig::parse(
            r#"
[providers.ollama]
api = "openai-completions"
keyless = true
"#,
        )
        .unwrap();
        let client = build_client(&config).unwrap();
        assert!(client.model("ollama", "llama3.1:8b").is_ok());
        assert!(matches!(
            client.model("openai", "gpt-4o"),
            Err(PiError::UnknownProvider(_))
        ));
    }
}
