pub mod builder;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod guard;
pub mod model;
pub mod providers;
pub mod relay;
pub mod server;

// Re-export commonly used types
pub use builder::GenerationRequestBuilder;
pub use config::{load_config, AppConfig};
pub use consumer::{
    HttpSubscriber, RecipeStore, RecipeStream, SessionSnapshot, SessionState, Subscriber,
};
pub use dispatcher::{GenerationDispatcher, ProviderSource};
pub use error::{ExtractionError, GenerationError, RequiredField};
pub use extract::ExtractedRecipe;
pub use model::{GenerationRequest, Provider, StreamEvent};
pub use providers::{FragmentStream, RecipeProvider};
pub use relay::{RelayOutcome, StreamRelay};

/// Extract a structured recipe from generated text.
///
/// Never fails: fields missing from the text get their defaults. Check
/// [`ExtractedRecipe::validate`] before handing the result to storage.
///
/// # Example
/// ```
/// let recipe = recipe_stream::extract_recipe("요리명: 김치볶음밥\n재료: 김치, 밥\n조리법:\n1. 볶는다");
/// assert_eq!(recipe.title, "김치볶음밥");
/// assert_eq!(recipe.ingredients, vec!["김치", "밥"]);
/// assert!(recipe.is_valid());
/// ```
pub fn extract_recipe(text: &str) -> ExtractedRecipe {
    extract::extract(text)
}

/// Generate a recipe text with the configured provider and wait for it to finish.
///
/// # Errors
/// - `InvalidRequest` when the request is rejected before any provider call
/// - `SessionFailed` when the session ends with an error frame
pub async fn generate_recipe_text(request: &GenerationRequest) -> Result<String, GenerationError> {
    let config = load_config()?;
    let dispatcher = GenerationDispatcher::from_config(&config)?;
    dispatcher.generate_text(request).await
}
