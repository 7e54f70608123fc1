//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::completion::HttpCompletionClient;
use crate::config::{RelayConfig, UpstreamErrorPolicy};
use crate::conversation::SqliteConversationStore;
use crate::error::RelayResult;

/// Shared application state.
pub struct AppState {
    /// Turn orchestration and conversation access.
    pub orchestrator: ChatOrchestrator,
    /// How completion failures are reported on `POST /api/chat`.
    pub upstream_errors: UpstreamErrorPolicy,
}

impl AppState {
    /// Wrap an orchestrator.
    #[must_use]
    pub fn new(orchestrator: ChatOrchestrator, upstream_errors: UpstreamErrorPolicy) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            upstream_errors,
        })
    }

    /// Open the database and build the completion client described by `config`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened or the HTTP client cannot be built.
    pub async fn from_config(config: &RelayConfig) -> RelayResult<Arc<Self>> {
        let store = SqliteConversationStore::open(&config.storage).await?;
        let completion = HttpCompletionClient::new(&config.completion)?;
        tracing::info!(
            "Conversation store: {}",
            config.storage.sqlite_path.display()
        );

        let orchestrator = ChatOrchestrator::new(Arc::new(store), Arc::new(completion));
        Ok(Self::new(orchestrator, config.upstream_errors))
    }
}
