//! Chat relay: a small HTTP service that stores chat conversations in `SQLite`
//! and forwards each turn to an OpenAI-compatible chat completion API.

// Strict lints; tests are allowed to unwrap.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(non_camel_case_types)]
#![deny(unused_must_use)]
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::redundant_clone)]
#![deny(overflowing_literals)]

/// Turn orchestration across the store and the completion client.
pub mod chat;
/// OpenAI-compatible completion client.
pub mod completion;
/// Environment-driven configuration.
pub mod config;
/// Conversation model and `SQLite` store.
pub mod conversation;
/// Crate-wide error type.
pub mod error;
/// HTTP server and API routes.
#[allow(clippy::missing_errors_doc, clippy::unused_async)]
pub mod server;
/// Entry helpers to start the chat relay.
pub mod start_chat_relay;

#[cfg(test)]
mod test_support;
