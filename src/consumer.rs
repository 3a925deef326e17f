//! Client Stream Consumer: follows one generation session at a time.
//!
//! Every session gets its own `watch` channel of [`SessionSnapshot`]s and its
//! own task. Starting a new session aborts the previous task before the new
//! channel exists, so two sessions never write into the same buffer.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ExtractionError, GenerationError};
use crate::extract::{extract, ExtractedRecipe};
use crate::model::{GenerationRequest, Provider, StreamEvent};
use crate::providers::sse::SseStreamExt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
    Done,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Streaming => write!(f, "STREAMING"),
            SessionState::Done => write!(f, "DONE"),
            SessionState::Error => write!(f, "ERROR"),
        }
    }
}

/// What a caller can observe of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub buffer: String,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// A fresh session: empty buffer, no error
    pub fn streaming() -> Self {
        SessionSnapshot {
            state: SessionState::Streaming,
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one event. Returns `false` when the event was ignored because
    /// the session is not streaming.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.state != SessionState::Streaming {
            return false;
        }

        match event {
            StreamEvent::Content(fragment) => self.buffer.push_str(&fragment),
            StreamEvent::Done => self.state = SessionState::Done,
            StreamEvent::Error(message) => {
                self.state = SessionState::Error;
                self.error = Some(message);
            }
        }
        true
    }

    /// Record a transport failure; the buffer is kept
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.apply(StreamEvent::Error(message.into()))
    }
}

/// Events of one subscription, in arrival order
pub type EventStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// Opens the push connection for a request
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn subscribe(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError>;
}

/// Subscribes to a running server's push-stream endpoint
pub struct HttpSubscriber {
    client: Client,
    endpoint: String,
}

impl HttpSubscriber {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        HttpSubscriber {
            client,
            endpoint: format!(
                "{}/recipes/generate-ai-stream",
                base_url.trim_end_matches('/')
            ),
        }
    }
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    async fn subscribe(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        let mut query = vec![
            ("ingredients", serde_json::to_string(request.ingredients())?),
            ("provider", request.provider().to_string()),
        ];
        if let Some(preferences) = request.preferences() {
            query.push(("preferences", preferences.to_string()));
        }

        debug!("Subscribing to {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "text/event-stream")
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let events = Box::pin(response.bytes_stream())
            .sse_events()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => match StreamEvent::from_json(&event.data) {
                        Ok(event) => Some(Ok(event)),
                        Err(e) => {
                            warn!("Skipping undecodable frame: {}", e);
                            None
                        }
                    },
                    Err(GenerationError::MalformedFragment(reason)) => {
                        warn!("Skipping malformed frame: {}", reason);
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(events.boxed())
    }
}

const CANCELLED: &str = "generation cancelled";

/// Receives a finished, valid recipe
#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn save(&self, recipe: &ExtractedRecipe, is_valid: bool) -> Result<(), GenerationError>;
}

struct Session {
    snapshots: watch::Receiver<SessionSnapshot>,
    // the task owns the sender; this handle lives only as long as the task
    updates: Weak<watch::Sender<SessionSnapshot>>,
    task: JoinHandle<()>,
}

/// Per-consumer generation state: at most one live subscription
pub struct RecipeStream<S> {
    subscriber: Arc<S>,
    provider: Provider,
    session: Option<Session>,
}

impl<S: Subscriber> RecipeStream<S> {
    pub fn new(subscriber: S) -> Self {
        RecipeStream {
            subscriber: Arc::new(subscriber),
            provider: Provider::default(),
            session: None,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Start a new session, cancelling the current one first.
    ///
    /// Fails without touching the current session when no ingredient is given.
    pub fn generate<I, T>(
        &mut self,
        ingredients: I,
        preferences: Option<String>,
    ) -> Result<(), GenerationError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let request = GenerationRequest::new(ingredients, preferences, self.provider)?;
        self.cancel();

        let (tx, rx) = watch::channel(SessionSnapshot::streaming());
        let tx = Arc::new(tx);
        let updates = Arc::downgrade(&tx);
        let task = tokio::spawn(drive(Arc::clone(&self.subscriber), request, tx));
        self.session = Some(Session {
            snapshots: rx,
            updates,
            task,
        });
        Ok(())
    }

    /// Abort the current subscription, if any.
    ///
    /// A session cancelled while streaming ends in ERROR with its buffer
    /// kept, so the last snapshot is always terminal once nothing feeds it.
    pub fn cancel(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let updates = session.updates.upgrade();
        session.task.abort();
        if let Some(updates) = updates {
            updates.send_modify(|snapshot| {
                if snapshot.fail(CANCELLED) {
                    info!("Cancelled active subscription");
                }
            });
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session
            .as_ref()
            .map(|session| session.snapshots.borrow().clone())
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    pub fn buffer(&self) -> String {
        self.snapshot().buffer
    }

    /// Receiver of the current session's snapshots
    pub fn watch(&self) -> Option<watch::Receiver<SessionSnapshot>> {
        self.session.as_ref().map(|session| session.snapshots.clone())
    }

    /// Wait until the current session is DONE or ERROR
    pub async fn wait_for_terminal(&self) -> SessionSnapshot {
        let Some(mut snapshots) = self.watch() else {
            return SessionSnapshot::default();
        };

        if let Ok(snapshot) = snapshots.wait_for(SessionSnapshot::is_terminal).await {
            return snapshot.clone();
        }
        let snapshot = snapshots.borrow().clone();
        snapshot
    }

    /// Best-effort extraction of whatever the buffer holds now
    pub fn preview(&self) -> ExtractedRecipe {
        extract(&self.buffer())
    }

    /// Extract the final recipe and apply the validity gate
    pub fn finalize(&self) -> Result<ExtractedRecipe, GenerationError> {
        let snapshot = self.snapshot();
        if snapshot.state != SessionState::Done {
            return Err(ExtractionError::NotFinished(snapshot.state.to_string()).into());
        }

        let recipe = extract(&snapshot.buffer);
        recipe.validate()?;
        Ok(recipe)
    }

    /// Hand the finalized recipe to `store`
    pub async fn save_with<St>(&self, store: &St) -> Result<ExtractedRecipe, GenerationError>
    where
        St: RecipeStore + ?Sized,
    {
        let recipe = self.finalize()?;
        store.save(&recipe, true).await?;
        Ok(recipe)
    }
}

impl<S> Drop for RecipeStream<S> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.task.abort();
        }
    }
}

async fn drive<S: Subscriber>(
    subscriber: Arc<S>,
    request: GenerationRequest,
    tx: Arc<watch::Sender<SessionSnapshot>>,
) {
    let mut events = match subscriber.subscribe(&request).await {
        Ok(events) => events,
        Err(e) => {
            warn!("Subscription failed: {}", e);
            tx.send_modify(|snapshot| {
                snapshot.fail(e.to_string());
            });
            return;
        }
    };

    while let Some(item) = events.next().await {
        let mut terminal = false;
        tx.send_modify(|snapshot| {
            match item {
                Ok(event) => snapshot.apply(event),
                Err(e) => snapshot.fail(e.to_string()),
            };
            terminal = snapshot.is_terminal();
        });
        if terminal {
            debug!("Session reached {}", tx.borrow().state);
            return;
        }
    }

    tx.send_modify(|snapshot| {
        snapshot.fail("stream closed before the session finished");
    });
}
