//! Turn orchestration: history assembly, completion call and persistence.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::conversation::{
    ChatMessage, Conversation, ConversationStore, ConversationSummary, Role, derive_title,
    should_derive_title,
};
use crate::error::{RelayError, RelayResult};

/// One chat turn, either against a stored conversation or a throwaway history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TurnRequest {
    /// Append to the conversation named by `session_id`, creating it if needed.
    Persisted {
        /// External session key.
        session_id: String,
        /// New user message.
        content: String,
    },
    /// Send the caller's history as-is; nothing is stored.
    Ephemeral {
        /// Full history, oldest first.
        messages: Vec<ChatMessage>,
    },
}

/// Ties the conversation store to the completion client.
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    completion: Arc<dyn CompletionClient>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChatOrchestrator {
    /// Create an orchestrator over the given store and completion client.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, completion: Arc<dyn CompletionClient>) -> Self {
        Self {
            store,
            completion,
            session_locks: DashMap::new(),
        }
    }

    /// Run a turn in whichever mode `request` asks for.
    ///
    /// # Errors
    /// See [`Self::handle_turn`] and [`Self::handle_ephemeral`].
    pub async fn run(&self, request: TurnRequest) -> RelayResult<String> {
        match request {
            TurnRequest::Persisted {
                session_id,
                content,
            } => self.handle_turn(&session_id, &content).await,
            TurnRequest::Ephemeral { messages } => self.handle_ephemeral(&messages).await,
        }
    }

    /// Run one persisted turn and return the assistant reply.
    ///
    /// The user message is stored before the completion call and stays stored
    /// if that call fails; no assistant message is written in that case.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] for a blank session id or content,
    /// [`RelayError::Upstream`] if the completion call fails, or a storage error.
    pub async fn handle_turn(&self, session_id: &str, user_content: &str) -> RelayResult<String> {
        require_session_id(session_id)?;
        if user_content.trim().is_empty() {
            return Err(RelayError::Validation("message content is empty".to_string()));
        }

        let _lease = self.lock_session(session_id).await;

        let mut conversation = self.store.get_or_create(session_id).await?;
        let user_message = self
            .store
            .append(conversation.id, Role::User, user_content)
            .await?;
        conversation.messages.push(user_message);

        if should_derive_title(&conversation, conversation.messages.len()) {
            let title = derive_title(user_content);
            conversation = self.store.rename(conversation.id, &title).await?;
            debug!("Derived title for session {session_id}: {}", conversation.title);
        }

        let history = conversation.history();
        let reply = match self.completion.complete(&history).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Completion failed for session {session_id}: {err}");
                return Err(err.into());
            }
        };

        self.store
            .append(conversation.id, Role::Assistant, &reply)
            .await?;
        info!(
            "Completed turn for session {session_id} ({} messages)",
            history.len() + 1
        );
        Ok(reply)
    }

    /// Run a stateless turn over caller-supplied history.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] for an empty history or
    /// [`RelayError::Upstream`] if the completion call fails.
    pub async fn handle_ephemeral(&self, messages: &[ChatMessage]) -> RelayResult<String> {
        if messages.is_empty() {
            return Err(RelayError::Validation("messages must not be empty".to_string()));
        }

        match self.completion.complete(messages).await {
            Ok(reply) => {
                debug!("Completed ephemeral turn ({} messages)", messages.len());
                Ok(reply)
            }
            Err(err) => {
                warn!("Completion failed for ephemeral turn: {err}");
                Err(err.into())
            }
        }
    }

    /// Load one conversation with its messages.
    ///
    /// # Errors
    /// Returns [`RelayError::NotFound`] if the session is unknown.
    pub async fn conversation(&self, session_id: &str) -> RelayResult<Conversation> {
        self.store
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(session_id.to_string()))
    }

    /// List all conversations, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn conversations(&self) -> RelayResult<Vec<ConversationSummary>> {
        self.store.list_all().await
    }

    /// Set a conversation's title.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] for a blank title or
    /// [`RelayError::NotFound`] if the session is unknown.
    pub async fn rename(&self, session_id: &str, title: &str) -> RelayResult<Conversation> {
        if title.trim().is_empty() {
            return Err(RelayError::Validation("title is empty".to_string()));
        }

        let conversation = self.conversation(session_id).await?;
        let _lease = self.lock_session(session_id).await;
        let renamed = self.store.rename(conversation.id, title).await?;
        info!("Renamed conversation for session {session_id} to: {title}");
        Ok(renamed)
    }

    async fn lock_session(&self, session_id: &str) -> SessionLease<'_> {
        let lock = Arc::clone(
            self.session_locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let mut lease = SessionLease {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            lock,
            guard: None,
        };
        lease.guard = Some(Arc::clone(&lease.lock).lock_owned().await);
        lease
    }
}

/// Exclusive hold on one session; drops its table entry once nobody else wants it.
struct SessionLease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    session_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.guard = None;
        // Only the table and this lease still point at the mutex.
        let _ = self.locks.remove_if(&self.session_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

fn require_session_id(session_id: &str) -> RelayResult<()> {
    if session_id.trim().is_empty() {
        return Err(RelayError::Validation("sessionId is empty".to_string()));
    }
    Ok(())
}
