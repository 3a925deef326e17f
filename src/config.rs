use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::model::Provider;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Provider used when a request does not name one
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Map of provider name to provider configuration
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Stream relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,
    /// Connect timeout for upstream calls in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Configuration for a specific upstream provider
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Whether this provider is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Model identifier (e.g., "gpt-3.5-turbo", "claude-3-haiku-20240307")
    pub model: String,
    /// Temperature for generation (0.0-1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API key for authentication (can also be set via environment variable)
    pub api_key: Option<String>,
    /// Base URL for API endpoint (for custom or proxy endpoints)
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Built-in settings for a provider that has no table in the config file
    pub fn defaults_for(provider: Provider) -> Self {
        let model = match provider {
            Provider::OpenAI => "gpt-3.5-turbo",
            Provider::Claude => "claude-3-haiku-20240307",
        };
        Self {
            enabled: true,
            model: model.to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Stream relay settings
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// A session fails when no fragment arrives within this many seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Frames buffered between upstream reader and client writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Remote provider endpoint; when set, sessions are relayed from it
    /// instead of calling a vendor API directly
    #[serde(default)]
    pub upstream_url: Option<String>,
}

impl RelayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            channel_capacity: default_channel_capacity(),
            upstream_url: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            default_provider: default_provider(),
            providers: HashMap::new(),
            relay: RelayConfig::default(),
            timeout: default_timeout(),
        }
    }
}

// Default value functions
fn default_provider() -> String {
    "openai".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_enabled() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    32
}

fn default_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables with RECIPE_STREAM__ prefix
    /// 2. config.toml file in current directory
    /// 3. Default values
    ///
    /// Environment variable format: RECIPE_STREAM__PROVIDERS__OPENAI__API_KEY
    pub fn load() -> Result<Self, ConfigError> {
        load_config()
    }

    /// Settings for `provider`, falling back to built-in defaults
    pub fn provider_config(&self, provider: Provider) -> ProviderConfig {
        self.providers
            .get(provider.as_str())
            .cloned()
            .unwrap_or_else(|| ProviderConfig::defaults_for(provider))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Load configuration from file and environment variables
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        // Optional config file (can be missing)
        .add_source(File::with_name("config").required(false))
        // Use double underscore for nested: RECIPE_STREAM__RELAY__IDLE_TIMEOUT_SECS
        .add_source(
            Environment::with_prefix("RECIPE_STREAM")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize()
}
