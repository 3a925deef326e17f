use crate::config::AppConfig;
use crate::error::GenerationError;
use crate::model::Provider;
use crate::providers::{AnthropicProvider, OpenAIProvider, RecipeProvider, RemoteProvider};
use reqwest::Client;
use std::sync::Arc;

pub struct ProviderFactory;

impl ProviderFactory {
    /// HTTP client shared by every provider: bounded connect time, no overall
    /// timeout since generations stream for as long as the provider writes
    pub fn http_client(config: &AppConfig) -> Result<Client, GenerationError> {
        Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GenerationError::ProviderConfig(e.to_string()))
    }

    /// Create the provider serving `provider` requests.
    ///
    /// When a remote upstream is configured it serves every selector and the
    /// selector travels in the request body instead.
    pub fn create(
        provider: Provider,
        config: &AppConfig,
        client: Client,
    ) -> Result<Arc<dyn RecipeProvider>, GenerationError> {
        if let Some(url) = &config.relay.upstream_url {
            return Ok(Arc::new(RemoteProvider::new(url.clone(), client)));
        }

        let provider_config = config.provider_config(provider);

        // Validate that provider is enabled
        if !provider_config.enabled {
            return Err(GenerationError::ProviderConfig(format!(
                "Provider '{}' is not enabled in configuration",
                provider
            )));
        }

        match provider {
            Provider::OpenAI => Ok(Arc::new(OpenAIProvider::new(&provider_config, client)?)),
            Provider::Claude => Ok(Arc::new(AnthropicProvider::new(&provider_config, client)?)),
        }
    }

    /// The configured default selector
    pub fn default_provider(config: &AppConfig) -> Result<Provider, GenerationError> {
        config.default_provider.parse().map_err(|_| {
            GenerationError::ProviderConfig(format!(
                "Default provider '{}' is not one of: {}",
                config.default_provider,
                Self::available_providers().join(", ")
            ))
        })
    }

    /// List all available provider names
    pub fn available_providers() -> Vec<&'static str> {
        Provider::all().iter().map(Provider::as_str).collect()
    }
}
