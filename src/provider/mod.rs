//! Upstream provider access.
//!
//! This module wraps the OpenAI-compatible API the relay forwards to:
//! streamed chat completions with locally rebuilt conversation context,
//! fine-tune lifecycle passthrough, and training file upload.

mod client;
pub mod sse;
pub mod store;
pub mod types;

pub use client::{OpenAiClient, API_MODEL};
pub use store::{MessageStore, StoredMessage};
pub use types::{ChatConfig, ChatContext, ChatMessage, ChatRequest, CompletionParams, Role};
