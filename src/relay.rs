//! Stream Relay: re-frames upstream fragments into [`StreamEvent`]s.
//!
//! One relay run owns one upstream stream and one client sink. Fragments are
//! forwarded as they arrive; the sink is a bounded channel, so a slow client
//! applies backpressure to upstream reads instead of growing a buffer. The
//! run ends with exactly one terminal event, or with none when the client has
//! gone away, in which case the upstream stream is dropped.

use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::GenerationError;
use crate::model::StreamEvent;
use crate::providers::FragmentStream;

/// How a relay run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `done` was written
    Completed,
    /// `error` was written with this message
    Failed(String),
    /// The client went away; nothing more was written
    ClientDisconnected,
}

#[derive(Debug, Clone)]
pub struct StreamRelay {
    idle_timeout: Duration,
}

impl StreamRelay {
    pub fn new(idle_timeout: Duration) -> Self {
        StreamRelay { idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Error raised when upstream stays silent for the whole idle interval
    pub fn idle_error(&self) -> GenerationError {
        GenerationError::transport(format!(
            "no data from upstream for {} seconds",
            self.idle_timeout.as_secs()
        ))
    }

    /// Relay `upstream` into `sink` until a terminal event or disconnect.
    pub async fn run(
        &self,
        mut upstream: FragmentStream,
        sink: mpsc::Sender<StreamEvent>,
    ) -> RelayOutcome {
        let mut forwarded = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!("Client disconnected after {} fragments, cancelling upstream", forwarded);
                    return RelayOutcome::ClientDisconnected;
                }
                next = timeout(self.idle_timeout, upstream.next()) => next,
            };

            let event = match next {
                Ok(Some(Ok(fragment))) => StreamEvent::Content(fragment),
                Ok(Some(Err(e))) => StreamEvent::Error(e.to_string()),
                Ok(None) => StreamEvent::Done,
                Err(_) => StreamEvent::Error(self.idle_error().to_string()),
            };

            let outcome = match &event {
                StreamEvent::Content(fragment) => {
                    debug!("Relaying fragment of {} bytes", fragment.len());
                    None
                }
                StreamEvent::Done => Some(RelayOutcome::Completed),
                StreamEvent::Error(message) => Some(RelayOutcome::Failed(message.clone())),
            };

            if sink.send(event).await.is_err() {
                info!("Client disconnected after {} fragments, cancelling upstream", forwarded);
                return RelayOutcome::ClientDisconnected;
            }

            match outcome {
                None => forwarded += 1,
                Some(RelayOutcome::Failed(message)) => {
                    warn!("Session failed after {} fragments: {}", forwarded, message);
                    return RelayOutcome::Failed(message);
                }
                Some(outcome) => {
                    info!("Session completed with {} fragments", forwarded);
                    return outcome;
                }
            }
        }
    }
}
