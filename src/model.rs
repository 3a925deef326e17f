use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GenerationError;

/// Upstream text-generation providers a request can select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Claude,
}

impl Provider {
    /// Name used in configuration tables and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Claude => "claude",
        }
    }

    pub fn all() -> [Provider; 2] {
        [Provider::OpenAI, Provider::Claude]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "claude" | "anthropic" => Ok(Provider::Claude),
            other => Err(GenerationError::invalid(format!(
                "Unsupported provider: {}",
                other
            ))),
        }
    }
}

/// A validated request for one generation session.
///
/// Ingredients are ordered, deduplicated and never empty; construct through
/// [`GenerationRequest::new`] or [`crate::GenerationRequestBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferences: Option<String>,
    provider: Provider,
}

impl GenerationRequest {
    pub fn new<I, S>(
        ingredients: I,
        preferences: Option<String>,
        provider: Provider,
    ) -> Result<Self, GenerationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for ingredient in ingredients {
            let ingredient = ingredient.into().trim().to_string();
            if !ingredient.is_empty() && !unique.contains(&ingredient) {
                unique.push(ingredient);
            }
        }

        if unique.is_empty() {
            return Err(GenerationError::invalid(
                "At least one ingredient is required",
            ));
        }

        let preferences = preferences
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(GenerationRequest {
            ingredients: unique,
            preferences,
            provider,
        })
    }

    pub fn ingredients(&self) -> &[String] {
        &self.ingredients
    }

    pub fn preferences(&self) -> Option<&str> {
        self.preferences.as_deref()
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Same request with sanitized inputs substituted
    pub(crate) fn with_inputs(&self, ingredients: Vec<String>, preferences: Option<String>) -> Self {
        GenerationRequest {
            ingredients,
            preferences,
            provider: self.provider,
        }
    }
}

/// One event of a generation session.
///
/// `Done` and `Error` are terminal: nothing follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    pub fn to_frame(&self) -> WireFrame {
        match self {
            StreamEvent::Content(content) => WireFrame {
                content: Some(content.clone()),
                ..Default::default()
            },
            StreamEvent::Done => WireFrame {
                done: Some(true),
                ..Default::default()
            },
            StreamEvent::Error(message) => WireFrame {
                error: Some(message.clone()),
                ..Default::default()
            },
        }
    }

    /// JSON object carried in the `data:` line of a push-stream frame
    pub fn to_json(&self) -> Result<String, GenerationError> {
        Ok(serde_json::to_string(&self.to_frame())?)
    }

    pub fn from_json(data: &str) -> Result<Self, GenerationError> {
        let frame: WireFrame = serde_json::from_str(data)?;
        frame.into_event()
    }
}

/// Wire shape of a frame: exactly one of the three keys is set when encoding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireFrame {
    /// Error wins over done, done wins over content.
    pub fn into_event(self) -> Result<StreamEvent, GenerationError> {
        if let Some(message) = self.error {
            return Ok(StreamEvent::Error(message));
        }
        if self.done == Some(true) {
            return Ok(StreamEvent::Done);
        }
        match self.content {
            Some(content) => Ok(StreamEvent::Content(content)),
            None => Err(GenerationError::MalformedFragment(
                "frame carries none of content, done or error".to_string(),
            )),
        }
    }
}
