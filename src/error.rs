//! Error types for chatrelay.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::proxy::types::Envelope;

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatrelay.
///
/// `Display` is the user-visible message placed in the `Fail` envelope, so
/// provider variants carry an already-mapped message rather than raw upstream text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Error: No access rights")]
    Unauthorized,

    #[error("密钥无效 | Secret key is invalid")]
    InvalidSecret,

    #[error("Too many request from this IP in {window}")]
    RateLimited { window: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Upload(String),

    #[error("{message}")]
    Provider { status: Option<u16>, message: String },

    #[error("[OpenAI] Request timed out")]
    Timeout,

    #[error("Upstream request failed: {0}")]
    Upstream(reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Client disconnected")]
    Cancelled,
}

impl Error {
    /// HTTP status used when this error is rendered as a response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Unauthorized | Error::InvalidSecret => StatusCode::UNAUTHORIZED,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Validation(_) | Error::Upload(_) => StatusCode::BAD_REQUEST,
            Error::Provider { .. } | Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // Nobody is listening any more; the status is never observed.
            Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Upstream(e)
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        Error::Upload(e.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Envelope::<()>::fail(self.to_string());
        (status, axum::Json(body)).into_response()
    }
}
