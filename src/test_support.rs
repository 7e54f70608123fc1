//! Shared fakes for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::chat::ChatOrchestrator;
use crate::completion::{CompletionClient, CompletionFuture, UpstreamError};
use crate::conversation::{ChatMessage, SqliteConversationStore};

/// Completion client that replays scripted outcomes, then echoes.
#[derive(Default)]
pub struct ScriptedCompletion {
    outcomes: Mutex<VecDeque<Result<String, UpstreamError>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    /// Replies `echo: <last message>` to every call.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns `outcomes` in order, then falls back to echoing.
    pub fn with_outcomes(
        outcomes: impl IntoIterator<Item = Result<String, UpstreamError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every history received so far.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
    ) -> CompletionFuture<'a, Result<String, UpstreamError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(history.to_vec());
            let scripted = self.outcomes.lock().unwrap().pop_front();
            // Give other tasks a chance to run mid-turn.
            tokio::task::yield_now().await;
            scripted.unwrap_or_else(|| {
                let last = history.last().map_or("", |m| m.content.as_str());
                Ok(format!("echo: {last}"))
            })
        })
    }
}

/// Orchestrator over a fresh in-memory store.
pub async fn orchestrator(
    completion: Arc<ScriptedCompletion>,
) -> (ChatOrchestrator, Arc<SqliteConversationStore>) {
    let store = Arc::new(SqliteConversationStore::open_in_memory().await.unwrap());
    let orchestrator = ChatOrchestrator::new(store.clone(), completion);
    (orchestrator, store)
}
