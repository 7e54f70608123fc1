//! Conversation persistence.
//!
//! - `types`: conversation, message and role model
//! - `store`: the storage trait and its `SQLite` implementation
//! - `title`: automatic title derivation

pub mod store;
pub mod title;
pub mod types;

pub use store::{ConversationStore, SqliteConversationStore, StoreFuture};
pub use title::{TITLE_MAX_CHARS, derive_title, should_derive_title};
pub use types::{
    ChatMessage, Conversation, ConversationId, ConversationSummary, Message, MessageId,
    PLACEHOLDER_TITLE, Role,
};
