//! Generation Dispatcher: the server-side entry point of a session.

use std::sync::Arc;

use futures::StreamExt;
use log::{info, warn};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::AppConfig;
use crate::error::GenerationError;
use crate::guard::screen_request;
use crate::model::{GenerationRequest, Provider, StreamEvent};
use crate::providers::{ProviderFactory, RecipeProvider};
use crate::relay::StreamRelay;

/// Events of one session; the last one is always terminal unless the
/// receiver is dropped first
pub type SessionEvents = ReceiverStream<StreamEvent>;

/// Resolves a provider selector to the provider serving it
pub trait ProviderSource: Send + Sync {
    fn provider_for(&self, provider: Provider) -> Result<Arc<dyn RecipeProvider>, GenerationError>;
}

/// Providers built from configuration on demand
pub struct ConfiguredProviders {
    config: AppConfig,
    client: Client,
}

impl ConfiguredProviders {
    pub fn new(config: AppConfig) -> Result<Self, GenerationError> {
        let client = ProviderFactory::http_client(&config)?;
        Ok(ConfiguredProviders { config, client })
    }
}

impl ProviderSource for ConfiguredProviders {
    fn provider_for(&self, provider: Provider) -> Result<Arc<dyn RecipeProvider>, GenerationError> {
        ProviderFactory::create(provider, &self.config, self.client.clone())
    }
}

pub struct GenerationDispatcher {
    providers: Arc<dyn ProviderSource>,
    relay: StreamRelay,
    channel_capacity: usize,
}

impl GenerationDispatcher {
    pub fn new(providers: Arc<dyn ProviderSource>, relay: StreamRelay, channel_capacity: usize) -> Self {
        GenerationDispatcher {
            providers,
            relay,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Dispatcher calling the providers named in `config`
    pub fn from_config(config: &AppConfig) -> Result<Self, GenerationError> {
        let providers = ConfiguredProviders::new(config.clone())?;
        Ok(Self::new(
            Arc::new(providers),
            StreamRelay::new(config.relay.idle_timeout()),
            config.relay.channel_capacity,
        ))
    }

    /// Validate `request` and start its session.
    ///
    /// Rejected requests fail here and no provider is called. Once accepted,
    /// every failure arrives as the session's terminal `error` event.
    pub fn dispatch(&self, request: &GenerationRequest) -> Result<SessionEvents, GenerationError> {
        let request = screen_request(request)?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        info!(
            "Starting {} session with {} ingredients",
            request.provider(),
            request.ingredients().len()
        );

        let providers = Arc::clone(&self.providers);
        let relay = self.relay.clone();
        tokio::spawn(async move {
            let provider = match providers.provider_for(request.provider()) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!("No provider for session: {}", e);
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let opened = tokio::select! {
                biased;
                _ = tx.closed() => {
                    info!("Client disconnected before upstream answered");
                    return;
                }
                opened = timeout(relay.idle_timeout(), provider.open_stream(&request)) => opened,
            };

            let upstream = match opened {
                Ok(Ok(upstream)) => upstream,
                Ok(Err(e)) => {
                    warn!("Upstream call to {} failed: {}", provider.provider_name(), e);
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
                Err(_) => {
                    let e = relay.idle_error();
                    warn!("Upstream call to {} failed: {}", provider.provider_name(), e);
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            relay.run(upstream, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Run a session to its end and return the generated text
    pub async fn generate_text(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut events = self.dispatch(request)?;
        let mut text = String::new();

        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Content(fragment) => text.push_str(&fragment),
                StreamEvent::Done => return Ok(text),
                StreamEvent::Error(message) => return Err(GenerationError::SessionFailed(message)),
            }
        }

        Err(GenerationError::SessionFailed(
            "session ended without a terminal event".to_string(),
        ))
    }
}
