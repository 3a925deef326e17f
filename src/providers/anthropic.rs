use crate::config::ProviderConfig;
use crate::error::GenerationError;
use crate::model::GenerationRequest;
use crate::providers::sse::{decode_events, Decoded, SseEvent, SseStreamExt};
use crate::providers::{
    build_user_prompt, ensure_success, FragmentStream, RecipeProvider, RECIPE_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

const PROVIDER: &str = "claude";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider from configuration
    pub fn new(config: &ProviderConfig, client: Client) -> Result<Self, GenerationError> {
        // Try config first, then fall back to environment variable
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                GenerationError::ProviderConfig(
                    "ANTHROPIC_API_KEY not found in config or environment".to_string(),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());

        Ok(AnthropicProvider {
            client,
            api_key,
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    #[doc(hidden)]
    pub fn with_base_url(api_key: String, base_url: String, model: String) -> Self {
        AnthropicProvider {
            client: Client::new(),
            api_key,
            base_url,
            model,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Messages-API event → fragment
fn decode_event(event: &SseEvent) -> Decoded {
    let payload: Value = match serde_json::from_str(&event.data) {
        Ok(payload) => payload,
        Err(e) => return Decoded::Malformed(e.to_string()),
    };

    let kind = payload["type"]
        .as_str()
        .or(event.event.as_deref())
        .unwrap_or_default();

    match kind {
        "content_block_delta" => match payload["delta"]["text"].as_str() {
            Some(text) if !text.is_empty() => Decoded::Fragment(text.to_string()),
            _ => Decoded::Skip,
        },
        "message_stop" => Decoded::Finished,
        "error" => {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("Unknown error");
            Decoded::Failed(GenerationError::provider(PROVIDER, message))
        }
        _ => Decoded::Skip,
    }
}

#[async_trait]
impl RecipeProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        debug!("Opening Anthropic stream with model {}", self.model);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
                "system": RECIPE_SYSTEM_PROMPT,
                "messages": [
                    {
                        "role": "user",
                        "content": build_user_prompt(request)
                    }
                ],
                "stream": true
            }))
            .send()
            .await?;

        let response = ensure_success(PROVIDER, response).await?;
        let events = Box::pin(response.bytes_stream()).sse_events();

        Ok(decode_events(PROVIDER, events, decode_event))
    }
}
