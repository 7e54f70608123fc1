//! Outbound calls to the chat completion API.

pub mod client;
pub mod error;

pub use client::{CompletionClient, CompletionFuture, HttpCompletionClient};
pub use error::{ERROR_SENTINEL_PREFIX, NO_REPLY_SENTINEL, UpstreamError};
