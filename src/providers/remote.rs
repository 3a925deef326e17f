use crate::error::GenerationError;
use crate::model::GenerationRequest;
use crate::providers::{ensure_success, FragmentStream, RecipeProvider};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, warn};
use reqwest::Client;

const PROVIDER: &str = "remote";

/// A generation service reached over HTTP.
///
/// The request is POSTed as `{ingredients, preferences?, provider}` and the
/// streamed response body is relayed as text, chunk by chunk, without looking
/// at its framing.
pub struct RemoteProvider {
    client: Client,
    url: String,
}

impl RemoteProvider {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        RemoteProvider {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RecipeProvider for RemoteProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        debug!("Opening remote stream at {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await?;

        let response = ensure_success(PROVIDER, response).await?;
        Ok(utf8_fragments(Box::pin(response.bytes_stream())))
    }
}

struct Utf8State<S> {
    chunks: S,
    carry: Vec<u8>,
}

/// Decode opaque body chunks as UTF-8 text.
///
/// A character split across two chunks is completed from the next chunk. A
/// chunk holding invalid bytes is skipped. Bytes still pending when the body
/// ends mean the last chunk was cut short, which fails the stream.
fn utf8_fragments<S, E>(chunks: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::fmt::Display,
{
    let state = Utf8State {
        chunks,
        carry: Vec::new(),
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            let chunk = match state.chunks.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Some((
                        Err(GenerationError::transport(format!("stream aborted: {}", e))),
                        None,
                    ))
                }
                None if state.carry.is_empty() => return None,
                None => {
                    return Some((
                        Err(GenerationError::transport(
                            "stream ended inside a multi-byte character",
                        )),
                        None,
                    ))
                }
            };

            state.carry.extend_from_slice(&chunk);
            match std::str::from_utf8(&state.carry) {
                Ok(text) => {
                    let text = text.to_string();
                    state.carry.clear();
                    if !text.is_empty() {
                        return Some((Ok(text), Some(state)));
                    }
                }
                Err(e) if e.error_len().is_none() => {
                    let valid = e.valid_up_to();
                    let rest = state.carry.split_off(valid);
                    let text = String::from_utf8_lossy(&state.carry).into_owned();
                    state.carry = rest;
                    if !text.is_empty() {
                        return Some((Ok(text), Some(state)));
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping malformed {} chunk of {} bytes: {}",
                        PROVIDER,
                        chunk.len(),
                        e
                    );
                    state.carry.clear();
                }
            }
        }
    })
    .boxed()
}
