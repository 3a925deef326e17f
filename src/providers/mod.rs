mod anthropic;
mod factory;
mod open_ai;
mod prompt;
mod remote;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use factory::ProviderFactory;
pub use open_ai::OpenAIProvider;
pub use prompt::{build_user_prompt, ANSWER_LAYOUT, RECIPE_SYSTEM_PROMPT};
pub use remote::RemoteProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::GenerationError;
use crate::model::GenerationRequest;

/// Text fragments of one upstream generation, in arrival order.
///
/// The stream ending is the upstream "finished" signal; an `Err` item is
/// terminal for the session.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// Unified trait for all upstream text-generation providers
#[async_trait]
pub trait RecipeProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "claude")
    fn provider_name(&self) -> &str;

    /// Start a streaming generation. Fails without yielding anything when the
    /// call cannot be established.
    async fn open_stream(&self, request: &GenerationRequest)
        -> Result<FragmentStream, GenerationError>;
}

/// Turn a non-success upstream response into a provider error
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::provider(
        provider,
        format!("upstream returned {}: {}", status, body.trim()),
    ))
}
