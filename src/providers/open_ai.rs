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

const PROVIDER: &str = "openai";

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration
    pub fn new(config: &ProviderConfig, client: Client) -> Result<Self, GenerationError> {
        // Try config first, then fall back to environment variable
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                GenerationError::ProviderConfig(
                    "OPENAI_API_KEY not found in config or environment".to_string(),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(OpenAIProvider {
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
        OpenAIProvider {
            client: Client::new(),
            api_key,
            base_url,
            model,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Chat-completions chunk → fragment. An `error` object wins over any
/// `finish_reason` carried by the same chunk.
fn decode_chunk(event: &SseEvent) -> Decoded {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Decoded::Finished;
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return Decoded::Malformed(e.to_string()),
    };

    if let Some(error) = chunk.get("error") {
        let message = error["message"]
            .as_str()
            .or_else(|| error.as_str())
            .unwrap_or("Unknown error");
        return Decoded::Failed(GenerationError::provider(PROVIDER, message));
    }

    match chunk["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => Decoded::Fragment(content.to_string()),
        _ => Decoded::Skip,
    }
}

#[async_trait]
impl RecipeProvider for OpenAIProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        debug!("Opening OpenAI stream with model {}", self.model);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": RECIPE_SYSTEM_PROMPT},
                    {"role": "user", "content": build_user_prompt(request)}
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "stream": true
            }))
            .send()
            .await?;

        let response = ensure_success(PROVIDER, response).await?;
        let events = Box::pin(response.bytes_stream()).sse_events();

        Ok(decode_events(PROVIDER, events, decode_chunk))
    }
}
