//! HTTP surface: the push-stream endpoint plus a blocking generate call.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::dispatcher::GenerationDispatcher;
use crate::error::GenerationError;
use crate::extract::{extract, ExtractedRecipe};
use crate::model::{GenerationRequest, Provider, StreamEvent};
use crate::providers::ProviderFactory;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<GenerationDispatcher>,
    default_provider: Provider,
}

impl AppState {
    pub fn new(dispatcher: GenerationDispatcher, default_provider: Provider) -> Self {
        AppState {
            dispatcher: Arc::new(dispatcher),
            default_provider,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, GenerationError> {
        Ok(Self::new(
            GenerationDispatcher::from_config(config)?,
            ProviderFactory::default_provider(config)?,
        ))
    }

    fn provider_or_default(&self, provider: Option<&str>) -> Result<Provider, GenerationError> {
        match provider.map(str::trim).filter(|p| !p.is_empty()) {
            Some(name) => name.parse(),
            None => Ok(self.default_provider),
        }
    }
}

/// Query of the push-stream endpoint; `ingredients` is a JSON array
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    ingredients: Option<String>,
    preferences: Option<String>,
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    ingredients: Vec<String>,
    preferences: Option<String>,
    provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GeneratedRecipe {
    pub recipe: ExtractedRecipe,
    pub raw_response: String,
    pub is_valid: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/recipes/generate-ai-stream", get(generate_stream))
        .route("/api/recipes/generate", post(generate))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Bind the configured address and serve until the process stops
pub async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(&config)?;
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address).await?;

    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn stream_request(state: &AppState, query: StreamQuery) -> Result<GenerationRequest, GenerationError> {
    let raw = query
        .ingredients
        .ok_or_else(|| GenerationError::invalid("ingredients parameter is required"))?;
    let ingredients: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| GenerationError::invalid(format!("ingredients must be a JSON array: {}", e)))?;
    let provider = state.provider_or_default(query.provider.as_deref())?;

    GenerationRequest::new(ingredients, query.preferences, provider)
}

fn to_sse(event: StreamEvent) -> Result<Event, Infallible> {
    let data = event
        .to_json()
        .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
    Ok(Event::default().data(data))
}

async fn generate_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let events: BoxStream<'static, StreamEvent> =
        match stream_request(&state, query).and_then(|request| state.dispatcher.dispatch(&request)) {
            Ok(session) => session.boxed(),
            Err(e) => {
                warn!("Rejected stream request: {}", e);
                stream::once(async move { StreamEvent::Error(e.to_string()) }).boxed()
            }
        };

    push_stream(events)
}

fn push_stream(
    events: impl Stream<Item = StreamEvent> + Send + 'static,
) -> impl IntoResponse {
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events.map(to_sse)).keep_alive(KeepAlive::default()),
    )
}

async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let request = state
        .provider_or_default(body.provider.as_deref())
        .and_then(|provider| GenerationRequest::new(body.ingredients, body.preferences, provider));

    let result = match request {
        Ok(request) => state.dispatcher.generate_text(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(raw_response) => {
            let recipe = extract(&raw_response);
            let is_valid = recipe.is_valid();
            let data = GeneratedRecipe {
                recipe,
                raw_response,
                is_valid,
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Recipe generated",
                    "data": data,
                })),
            )
                .into_response()
        }
        Err(e) => {
            let status = match e {
                GenerationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                GenerationError::SessionFailed(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Generate request failed with {}: {}", status, e);
            (
                status,
                Json(json!({
                    "success": false,
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "recipe-stream",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
