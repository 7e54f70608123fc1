//! Automatic conversation titles.

use super::types::Conversation;

/// Longest derived title, in characters, before the ellipsis is added.
pub const TITLE_MAX_CHARS: usize = 50;
/// Marker appended to truncated titles.
pub const TITLE_ELLIPSIS: &str = "...";
/// Highest message count (after the new user message) at which a title may still be derived.
pub const TITLE_DERIVATION_MAX_MESSAGES: usize = 2;

/// Build a title from the first user message.
///
/// Counts characters, not bytes, so multi-byte text is never split.
#[must_use]
pub fn derive_title(content: &str) -> String {
    match content.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}{TITLE_ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}

/// Whether a title should be derived now.
///
/// `message_count` includes the user message that was just appended. This
/// guard re-fires if messages are ever deleted behind the relay's back.
#[must_use]
pub fn should_derive_title(conversation: &Conversation, message_count: usize) -> bool {
    conversation.has_placeholder_title() && message_count <= TITLE_DERIVATION_MAX_MESSAGES
}
