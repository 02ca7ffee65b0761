//! chatrelay - streaming chat relay for OpenAI-compatible providers
//!
//! This library provides the relay's configuration, the provider client
//! and the HTTP server that fronts it.

pub mod config;
pub mod error;
pub mod provider;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
