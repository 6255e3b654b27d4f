//! Scripted provider: replays canned responses as a delta stream.
//!
//! Used for offline runs (`provider_type` wiring is not needed) and throughout the tests,
//! where the shape of the stream matters more than its content.

use super::{ChatMessage, CompletionStream, GenerationParams, ModelProviderClient};
use crate::error::GenerationError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Full text, split into deltas of the provider's chunk size
    Text(String),
    /// Explicit delta boundaries
    Chunks(Vec<String>),
    /// The stream fails to open
    Fail(GenerationError),
    /// The stream opens and never yields
    Hang,
}

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    chunk_chars: usize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            chunk_chars: 7,
            delay: None,
        }
    }

    /// Shorthand for a script of plain text replies.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|t| ScriptedResponse::Text(t.into()))
                .collect(),
        )
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    /// Sleep between deltas.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    /// Messages received by each call so far.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }

    fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait]
impl ModelProviderClient for ScriptedProvider {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _params: GenerationParams,
    ) -> Result<CompletionStream, GenerationError> {
        self.calls.lock().push(messages);
        let next = self.responses.lock().pop_front();

        let chunks = match next {
            Some(ScriptedResponse::Text(text)) => self.split(&text),
            Some(ScriptedResponse::Chunks(chunks)) => chunks,
            Some(ScriptedResponse::Fail(err)) => return Err(err),
            Some(ScriptedResponse::Hang) => return Ok(Box::pin(futures::stream::pending())),
            None => {
                return Err(GenerationError::Provider(
                    "Scripted provider has no responses left".to_string(),
                ))
            }
        };

        let items = futures::stream::iter(chunks.into_iter().map(Ok));
        match self.delay {
            Some(delay) => Ok(Box::pin(items.then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(items)),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
