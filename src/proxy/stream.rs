//! Streaming chat relay.
//!
//! The provider call runs inside a spawned relay task that forwards each
//! [`ChatMessage`] to the response body as soon as it arrives. Frames are
//! JSON objects separated by `\n`, with no separator before the first one.
//! When the client goes away the relay task returns, dropping the provider
//! future and with it the upstream HTTP response.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::Envelope;
use crate::error::Error;
use crate::provider::{ChatMessage, ChatRequest, OpenAiClient};

/// Buffered frames between the relay task and the response body.
const BODY_BUFFER: usize = 32;
/// Buffered replies between the provider call and the relay task.
const CHUNK_BUFFER: usize = 32;

type BodySender = mpsc::Sender<Result<Bytes, std::io::Error>>;

/// Newline-delimited JSON framing.
#[derive(Debug, Default)]
pub struct NdjsonFramer {
    started: bool,
}

impl NdjsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` as the next frame.
    ///
    /// Returns `None` (and logs) if the value cannot be serialized.
    pub fn frame<T: Serialize>(&mut self, value: &T) -> Option<Bytes> {
        let json = match serde_json::to_vec(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize stream frame");
                return None;
            }
        };

        let mut frame = Vec::with_capacity(json.len() + 1);
        if self.started {
            frame.push(b'\n');
        }
        frame.extend_from_slice(&json);
        self.started = true;
        Some(Bytes::from(frame))
    }
}

/// Start relaying `request` and return the streaming response immediately.
pub fn relay_chat(provider: Arc<OpenAiClient>, request: ChatRequest) -> Response {
    let (body_tx, body_rx) = mpsc::channel(BODY_BUFFER);
    tokio::spawn(forward_chat(provider, request, body_tx));

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response()
}

async fn send_frame<T: Serialize>(
    body_tx: &BodySender,
    framer: &mut NdjsonFramer,
    value: &T,
) -> bool {
    match framer.frame(value) {
        Some(bytes) => body_tx.send(Ok(bytes)).await.is_ok(),
        None => true,
    }
}

/// Drive one chat completion, writing frames into `body_tx` until it finishes.
///
/// Provider failures become a single `Fail` envelope frame.
pub(crate) async fn forward_chat(
    provider: Arc<OpenAiClient>,
    request: ChatRequest,
    body_tx: BodySender,
) {
    let start = Instant::now();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<ChatMessage>(CHUNK_BUFFER);
    let mut framer = NdjsonFramer::new();
    let mut relayed = 0usize;

    let reply = provider.chat_reply_process(&request, chunk_tx);
    tokio::pin!(reply);

    let outcome = loop {
        tokio::select! {
            biased;
            Some(message) = chunk_rx.recv() => {
                if !send_frame(&body_tx, &mut framer, &message).await {
                    tracing::info!(
                        chunks = relayed,
                        "Client disconnected, cancelling upstream request"
                    );
                    return;
                }
                relayed += 1;
            }
            result = &mut reply => break result,
            _ = body_tx.closed() => {
                tracing::info!(
                    chunks = relayed,
                    "Client disconnected, cancelling upstream request"
                );
                return;
            }
        }
    };

    // The provider may finish while replies are still buffered
    while let Ok(message) = chunk_rx.try_recv() {
        if !send_frame(&body_tx, &mut framer, &message).await {
            return;
        }
        relayed += 1;
    }

    let latency_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(reply) => {
            tracing::info!(
                id = %reply.id,
                chunks = relayed,
                latency_ms = latency_ms,
                "Chat stream completed"
            );
        }
        Err(Error::Cancelled) => {
            tracing::debug!(chunks = relayed, "Chat stream cancelled");
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                chunks = relayed,
                latency_ms = latency_ms,
                "Chat stream failed"
            );
            send_frame(&body_tx, &mut framer, &Envelope::<()>::fail(e.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_has_no_separator() {
        let mut framer = NdjsonFramer::new();
        let first = framer.frame(&serde_json::json!({"n": 1})).unwrap();
        let second = framer.frame(&serde_json::json!({"n": 2})).unwrap();
        assert_eq!(&first[..], br#"{"n":1}"#);
        assert_eq!(&second[..], b"\n{\"n\":2}");
    }

    #[test]
    fn test_frames_split_back_into_objects() {
        let mut framer = NdjsonFramer::new();
        let mut body = Vec::new();
        for n in 0..3 {
            body.extend_from_slice(&framer.frame(&serde_json::json!({"n": n})).unwrap());
        }
        body.extend_from_slice(&framer.frame(&Envelope::<()>::fail("boom")).unwrap());

        let text = String::from_utf8(body).unwrap();
        let lines: Vec<serde_json::Value> = text
            .split('\n')
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2]["n"], 2);
        assert_eq!(lines[3]["status"], "Fail");
        assert_eq!(lines[3]["message"], "boom");
    }
}
