//! Relay wire types: the response envelope and route request bodies.

use axum::extract::FromRequest;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Outcome marker carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Fail,
}

/// `{ status, message, data }` wrapper used by all non-streaming endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: Status,
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Successful envelope with an empty message.
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            message: String::new(),
            data: Some(data),
        }
    }

    /// Successful envelope with a message and optional payload.
    pub fn success_with_message(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            data,
        }
    }

    /// Failure envelope; `data` is always null.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON body extractor whose rejections become `Fail` envelopes.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct JsonBody<T>(pub T);

/// Payload of `POST /session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Whether a shared secret is configured.
    pub auth: bool,
    /// Active API kind.
    pub model: String,
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub token: String,
}

/// Body of `POST /model-detail`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDetailRequest {
    #[serde(default)]
    pub id: String,
}

/// Body of `POST /cancel-model`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelModelRequest {
    #[serde(default)]
    pub id: String,
}

/// Body of `POST /delete-model`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteModelRequest {
    #[serde(default)]
    pub fine_tuned_model: String,
}
