//! HTTP client for an OpenAI-compatible chat completion endpoint.
//!
//! One POST per call, no retries, no streaming. The endpoint, bearer token,
//! model and timeouts all come from [`CompletionConfig`].

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{ApiKey, CompletionConfig};
use crate::conversation::ChatMessage;

use super::error::UpstreamError;

/// Boxed future type for completion calls.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Turns an ordered message history into a reply.
pub trait CompletionClient: Send + Sync {
    /// Request a completion for `history` and return the reply text verbatim.
    ///
    /// # Errors
    /// Returns an [`UpstreamError`] describing why no reply is available.
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
    ) -> CompletionFuture<'a, Result<String, UpstreamError>>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`CompletionClient`] backed by `reqwest`.
pub struct HttpCompletionClient {
    client: Client,
    endpoint: Url,
    api_key: ApiKey,
    model: String,
}

impl HttpCompletionClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &CompletionConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn post_completion(&self, history: &[ChatMessage]) -> Result<String, UpstreamError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: history,
        };
        debug!(
            "Posting {} message(s) to {} with model {}",
            history.len(),
            self.endpoint,
            self.model
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UpstreamError::status(status.as_u16(), &body));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body)?;
        first_reply(parsed).ok_or(UpstreamError::EmptyChoices)
    }
}

/// Content of the first choice; a choice without content reads as empty text.
fn first_reply(response: CompletionResponse) -> Option<String> {
    response
        .choices
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|choice| {
            choice
                .message
                .and_then(|message| message.content)
                .unwrap_or_default()
        })
}

impl CompletionClient for HttpCompletionClient {
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
    ) -> CompletionFuture<'a, Result<String, UpstreamError>> {
        Box::pin(self.post_completion(history))
    }
}
