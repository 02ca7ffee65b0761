//! OpenAI-compatible provider client.
//!
//! Every call is a single round trip: no caching, no retry, no backoff.
//! Upstream failures are mapped to user-facing messages here so the router
//! never has to look at raw provider error bodies.

use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, Utc};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::sse::{SseDecoder, SseEvent};
use super::store::{MessageStore, StoredMessage};
use super::types::{
    ChatConfig, ChatMessage, ChatRequest, CreateModelRequest, DeleteModelResponse, FileObject,
    ListResponse, ModelInfo, ModelRecord, Role,
};
use crate::config::{ConfigError, ProviderConfig};
use crate::error::{Error, Result};

/// API kind reported to the front-end.
pub const API_MODEL: &str = "ChatGPTAPI";

/// Purpose tag for files uploaded as fine-tune training data.
const FINE_TUNE_PURPOSE: &str = "fine-tune";

/// Map an upstream HTTP failure to the message shown to users.
///
/// Well-known statuses get a fixed message; anything else surfaces the
/// provider's own `error.message` when the body carries one.
pub(crate) fn provider_error(status: StatusCode, body: &str) -> Error {
    let message = match status.as_u16() {
        401 => "[OpenAI] Incorrect API key provided".to_string(),
        403 => "[OpenAI] Server refused to access, please try again later".to_string(),
        500 => "[OpenAI] Internal Server Error".to_string(),
        502 => "[OpenAI] Bad Gateway".to_string(),
        503 => "[OpenAI] Server is busy, please try again later".to_string(),
        504 => "[OpenAI] Gateway Time-out".to_string(),
        _ => serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("[OpenAI] Provider returned {}", status)),
    };

    Error::Provider {
        status: Some(status.as_u16()),
        message,
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %body, "Provider returned error");
    Err(provider_error(status, &body))
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(value)
}

/// Strip credentials from a proxy URL before showing it to anyone.
fn display_proxy(proxy: Option<&str>) -> String {
    let Some(raw) = proxy else {
        return "-".to_string();
    };
    match Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            url.to_string()
        }
        Err(_) => "-".to_string(),
    }
}

/// Accumulates streamed deltas into the reply the front-end sees.
#[derive(Debug)]
pub(crate) struct ReplyBuilder {
    message: ChatMessage,
    provider_id: bool,
}

impl ReplyBuilder {
    pub(crate) fn new(parent_message_id: String, conversation_id: Option<String>) -> Self {
        Self {
            message: ChatMessage {
                id: Uuid::new_v4().to_string(),
                role: Role::Assistant,
                text: String::new(),
                delta: None,
                detail: None,
                parent_message_id: Some(parent_message_id),
                conversation_id,
            },
            provider_id: false,
        }
    }

    /// Fold one provider chunk in. Returns `true` when it added visible text.
    pub(crate) fn apply(&mut self, chunk: Value) -> Result<bool> {
        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Provider stream error");
            return Err(Error::Provider {
                status: None,
                message: message.to_string(),
            });
        }

        if !self.provider_id {
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.message.id = id.to_string();
                self.provider_id = true;
            }
        }

        let content = chunk
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Ok(false);
        }

        self.message.text.push_str(&content);
        self.message.delta = Some(content);
        self.message.detail = Some(chunk);
        Ok(true)
    }

    pub(crate) fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub(crate) fn into_message(self) -> ChatMessage {
        self.message
    }
}

async fn emit(chunks: &mpsc::Sender<ChatMessage>, message: &ChatMessage) -> Result<()> {
    chunks
        .send(message.clone())
        .await
        .map_err(|_| Error::Cancelled)
}

/// Client for an OpenAI-compatible chat and fine-tune API.
pub struct OpenAiClient {
    http: Client,
    config: ProviderConfig,
    store: MessageStore,
}

impl OpenAiClient {
    /// Build the client, routing upstream traffic through the configured proxy.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_secs(10));

        // SOCKS wins when both are set
        if let Some(proxy_url) = config.socks_proxy.as_deref().or(config.https_proxy.as_deref()) {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                ConfigError::Validation(format!("Invalid proxy URL: {}", e))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config: config.clone(),
            store: MessageStore::new(config.max_stored_messages),
        })
    }

    /// Active API kind.
    pub fn api_model(&self) -> &'static str {
        API_MODEL
    }

    /// Chat model used when a request names none.
    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// `<base>/v1/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        let mut url = Url::parse(&format!("{}/v1", base))
            .map_err(|e| Error::Internal(format!("Invalid provider URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Internal("Provider URL cannot carry a path".to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    fn build_messages(&self, request: &ChatRequest, user: &StoredMessage) -> Vec<Value> {
        let mut messages = Vec::new();

        let system = request.system_message.trim();
        if !system.is_empty() {
            messages.push(json!({ "role": Role::System, "content": system }));
        }

        let history = self.store.history(
            user.parent_message_id.as_deref(),
            self.config.max_history_messages,
        );
        for message in history {
            messages.push(json!({ "role": message.role, "content": message.text }));
        }

        messages.push(json!({ "role": Role::User, "content": user.text }));
        messages
    }

    /// Stream a chat completion, sending each accumulated reply on `chunks`.
    ///
    /// Resolves with the final reply once the provider signals completion.
    /// Returns [`Error::Cancelled`] as soon as the receiving side is gone;
    /// the upstream response is dropped with this future.
    pub async fn chat_reply_process(
        &self,
        request: &ChatRequest,
        chunks: mpsc::Sender<ChatMessage>,
    ) -> Result<ChatMessage> {
        let model = request
            .completion_params
            .as_ref()
            .map(|p| p.model.trim())
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.model)
            .to_string();

        let user_message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            text: request.prompt.clone(),
            parent_message_id: request.options.parent_message_id.clone(),
        };

        let messages = self.build_messages(request, &user_message);
        tracing::debug!(
            model = %model,
            context_messages = messages.len(),
            "Sending chat completion request"
        );

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if let Some(stop) = request.completion_params.as_ref().and_then(|p| p.stop.as_ref()) {
            body["stop"] = json!(stop);
        }

        let url = self.endpoint(&["chat", "completions"])?;
        let response = self
            .authorize(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut reply = ReplyBuilder::new(
            user_message.id.clone(),
            request.options.conversation_id.clone(),
        );
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();

        'stream: while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            for event in decoder.process_chunk(&bytes) {
                match event {
                    SseEvent::Done => break 'stream,
                    SseEvent::Data(chunk) => {
                        if reply.apply(chunk)? {
                            emit(&chunks, reply.message()).await?;
                        }
                    }
                }
            }
        }

        if !decoder.is_done() {
            for event in decoder.finish() {
                if let SseEvent::Data(chunk) = event {
                    if reply.apply(chunk)? {
                        emit(&chunks, reply.message()).await?;
                    }
                }
            }
        }

        let reply = reply.into_message();
        self.store.insert(user_message);
        self.store.insert(StoredMessage {
            id: reply.id.clone(),
            role: Role::Assistant,
            text: reply.text.clone(),
            parent_message_id: reply.parent_message_id.clone(),
        });

        Ok(reply)
    }

    /// `GET /v1/models`
    pub async fn get_models(&self) -> Result<ListResponse<ModelInfo>> {
        let url = self.endpoint(&["models"])?;
        self.send_json(self.http.get(url)).await
    }

    /// `GET /v1/fine-tunes`
    pub async fn get_list(&self) -> Result<ListResponse<ModelRecord>> {
        let url = self.endpoint(&["fine-tunes"])?;
        self.send_json(self.http.get(url)).await
    }

    /// `GET /v1/fine-tunes/{id}`
    pub async fn get_model_detail(&self, id: &str) -> Result<ModelRecord> {
        let id = require("id", id)?;
        let url = self.endpoint(&["fine-tunes", id])?;
        self.send_json(self.http.get(url)).await
    }

    /// `POST /v1/fine-tunes`
    pub async fn create_model(&self, job: &CreateModelRequest) -> Result<ModelRecord> {
        require("training_file", &job.training_file)?;
        let url = self.endpoint(&["fine-tunes"])?;
        let record: ModelRecord = self.send_json(self.http.post(url).json(job)).await?;
        tracing::info!(id = %record.id, model = %record.model, "Fine-tune created");
        Ok(record)
    }

    /// `POST /v1/fine-tunes/{id}/cancel`
    pub async fn cancel_model(&self, id: &str) -> Result<ModelRecord> {
        let id = require("id", id)?;
        let url = self.endpoint(&["fine-tunes", id, "cancel"])?;
        let record: ModelRecord = self.send_json(self.http.post(url)).await?;
        tracing::info!(id = %record.id, status = %record.status, "Fine-tune cancelled");
        Ok(record)
    }

    /// `DELETE /v1/models/{name}`
    pub async fn delete_model(&self, name: &str) -> Result<DeleteModelResponse> {
        let name = require("fine_tuned_model", name)?;
        let url = self.endpoint(&["models", name])?;
        let deleted: DeleteModelResponse = self.send_json(self.http.delete(url)).await?;
        tracing::info!(model = %name, deleted = deleted.deleted, "Fine-tuned model deleted");
        Ok(deleted)
    }

    /// Upload a stored file as fine-tune training data (`POST /v1/files`).
    pub async fn upload_training_file(&self, path: &Path, filename: &str) -> Result<FileObject> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Upload(format!("Failed to read stored upload: {}", e)))?;
        let size = bytes.len();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", FINE_TUNE_PURPOSE)
            .part("file", part);

        let url = self.endpoint(&["files"])?;
        let file: FileObject = self.send_json(self.http.post(url).multipart(form)).await?;
        tracing::info!(file_id = %file.id, bytes = size, "Training file uploaded");
        Ok(file)
    }

    /// Month-to-date usage in dollars from the billing endpoint.
    pub async fn fetch_usage(&self) -> Result<f64> {
        let today = Utc::now().date_naive();
        let start = today.with_day(1).unwrap_or(today);
        let end = today.succ_opt().unwrap_or(today);

        let mut url = self.endpoint(&["dashboard", "billing", "usage"])?;
        url.query_pairs_mut()
            .append_pair("start_date", &start.format("%Y-%m-%d").to_string())
            .append_pair("end_date", &end.format("%Y-%m-%d").to_string());

        let usage: Value = self.send_json(self.http.get(url)).await?;
        let cents = usage
            .get("total_usage")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::Provider {
                status: None,
                message: "Usage response missing total_usage".to_string(),
            })?;
        Ok(cents / 100.0)
    }

    /// Non-secret settings plus the current balance (`-` when unavailable).
    pub async fn chat_config(&self) -> ChatConfig {
        let balance = match self.fetch_usage().await {
            Ok(usage) => format!("{:.2}", usage),
            Err(e) => {
                tracing::debug!(error = %e, "Usage lookup failed");
                "-".to_string()
            }
        };

        ChatConfig {
            api_model: API_MODEL.to_string(),
            model: self.config.model.clone(),
            timeout_ms: self.config.timeout_ms,
            socks_proxy: display_proxy(self.config.socks_proxy.as_deref()),
            https_proxy: display_proxy(self.config.https_proxy.as_deref()),
            balance,
        }
    }
}
