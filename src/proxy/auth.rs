//! Shared-secret credential gate.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::server::AppState;
use crate::error::{Error, Result};

/// Token from `Authorization`, with an optional `Bearer ` prefix removed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Constant-time, exact comparison of a presented token against the secret.
pub fn secret_matches(token: &str, secret: &str) -> bool {
    token.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Middleware guarding privileged routes.
///
/// Passes everything through when no secret is configured.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Some(secret) = state.config.auth.secret() {
        let authorized = bearer_token(request.headers())
            .map(|token| secret_matches(token, secret))
            .unwrap_or(false);
        if !authorized {
            tracing::debug!(path = %request.uri().path(), "Rejected request without valid token");
            return Err(Error::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}
