//! HTTP relay server module.
//!
//! This module exposes the chat relay API: the credential gate, per-client
//! rate limiting, upload handling and the streaming chat endpoint, all
//! answering with the `{ status, message, data }` envelope.

pub mod auth;
mod handlers;
pub mod rate_limit;
mod server;
pub mod stream;
pub mod types;
pub mod upload;

pub use rate_limit::RateLimiter;
pub use server::{create_router, run_server, AppState};
pub use stream::NdjsonFramer;
pub use types::{Envelope, Status};
