use crate::error::GenerationError;
use crate::guard::screen_request;
use crate::model::{GenerationRequest, Provider};

/// Builder for assembling a generation request from user input
#[derive(Debug, Default)]
pub struct GenerationRequestBuilder {
    ingredients: Vec<String>,
    preferences: Option<String>,
    provider: Provider,
    screened: bool,
}

impl GenerationRequestBuilder {
    /// Add one ingredient
    ///
    /// # Example
    /// ```
    /// use recipe_stream::GenerationRequest;
    ///
    /// let builder = GenerationRequest::builder()
    ///     .ingredient("토마토")
    ///     .ingredient("계란");
    /// ```
    pub fn ingredient(mut self, ingredient: impl Into<String>) -> Self {
        self.ingredients.push(ingredient.into());
        self
    }

    /// Add several ingredients, keeping their order
    ///
    /// # Example
    /// ```
    /// use recipe_stream::GenerationRequest;
    ///
    /// let builder = GenerationRequest::builder().ingredients(["김치", "밥"]);
    /// ```
    pub fn ingredients<I, S>(mut self, ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ingredients
            .extend(ingredients.into_iter().map(Into::into));
        self
    }

    /// Free-text cooking preferences, e.g. "매운맛으로"
    pub fn preferences(mut self, preferences: impl Into<String>) -> Self {
        self.preferences = Some(preferences.into());
        self
    }

    /// Select the upstream provider
    ///
    /// # Example
    /// ```
    /// use recipe_stream::{GenerationRequest, Provider};
    ///
    /// let builder = GenerationRequest::builder()
    ///     .ingredient("두부")
    ///     .provider(Provider::Claude);
    /// ```
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Also sanitize and screen the inputs while building
    pub fn screened(mut self) -> Self {
        self.screened = true;
        self
    }

    /// Validate and build the request
    ///
    /// # Errors
    /// Returns `GenerationError::InvalidRequest` if:
    /// - No non-blank ingredient was given
    /// - Screening is enabled and the inputs are unusable or unsafe
    ///
    /// # Example
    /// ```
    /// use recipe_stream::GenerationRequest;
    ///
    /// let request = GenerationRequest::builder()
    ///     .ingredients(["토마토", "계란"])
    ///     .preferences("간단하게")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(request.ingredients(), &["토마토", "계란"]);
    ///
    /// assert!(GenerationRequest::builder().build().is_err());
    /// ```
    pub fn build(self) -> Result<GenerationRequest, GenerationError> {
        let request = GenerationRequest::new(self.ingredients, self.preferences, self.provider)?;
        if self.screened {
            screen_request(&request)
        } else {
            Ok(request)
        }
    }
}

impl GenerationRequest {
    /// Creates a new builder for a generation request
    pub fn builder() -> GenerationRequestBuilder {
        GenerationRequestBuilder::default()
    }
}
