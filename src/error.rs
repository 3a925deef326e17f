use std::fmt;
use thiserror::Error;

/// Errors that can occur while generating and relaying a recipe
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The generation request was rejected before reaching a provider
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream unreachable, aborted mid-stream, or idle for too long
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single upstream chunk could not be decoded
    #[error("Malformed fragment: {0}")]
    MalformedFragment(String),

    /// The upstream provider reported an error
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// A generation session ended with an `error` frame
    #[error("Generation failed: {0}")]
    SessionFailed(String),

    /// Provider could not be constructed from configuration
    #[error("Provider configuration error: {0}")]
    ProviderConfig(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The generated recipe cannot be saved
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl GenerationError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GenerationError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        GenerationError::Transport(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        GenerationError::InvalidRequest(message.into())
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

/// Fields a recipe must carry before it can be handed to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    Ingredients,
    Instructions,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredField::Ingredients => write!(f, "ingredients"),
            RequiredField::Instructions => write!(f, "instructions"),
        }
    }
}

/// Raised when finalizing an extracted recipe, never while streaming
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Recipe is missing required fields: {}", join_fields(.0))]
    MissingFields(Vec<RequiredField>),

    #[error("Recipe text is not final yet (session is {0})")]
    NotFinished(String),
}

fn join_fields(fields: &[RequiredField]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_names_each_field() {
        let err = ExtractionError::MissingFields(vec![RequiredField::Instructions]);
        assert_eq!(
            err.to_string(),
            "Recipe is missing required fields: instructions"
        );

        let err = ExtractionError::MissingFields(vec![
            RequiredField::Ingredients,
            RequiredField::Instructions,
        ]);
        assert!(err.to_string().ends_with("ingredients, instructions"));
    }

    #[test]
    fn test_provider_error_display() {
        let err = GenerationError::provider("openai", "rate limited");
        assert_eq!(err.to_string(), "Provider error: openai - rate limited");
    }
}
