//! Request and response shapes exchanged with the provider.
//!
//! Management records are mirrored, never interpreted: unknown fields are kept
//! in `extra` so the front-end sees exactly what the provider returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Prior conversation context supplied by the front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

/// Optional overrides for a single completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionParams {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Body of `POST /chat-process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: ChatContext,
    #[serde(default)]
    pub system_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_params: Option<CompletionParams>,
}

/// One streamed reply unit.
///
/// `text` accumulates the whole reply so far; `delta` is the newest fragment
/// and `detail` the raw provider chunk it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// `GET /v1/models` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Provider list wrapper (`{ object: "list", data: [...] }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub object: String,
    pub data: Vec<T>,
}

/// Fine-tune hyperparameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyperParams {
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub learning_rate_multiplier: Option<f64>,
    #[serde(default)]
    pub n_epochs: Option<u32>,
    #[serde(default)]
    pub prompt_loss_weight: Option<f64>,
}

/// Provider-side error object attached to failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A fine-tune job as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub hyperparams: Option<HyperParams>,
    #[serde(default)]
    pub training_files: Vec<Value>,
    #[serde(default)]
    pub result_files: Vec<Value>,
    #[serde(default)]
    pub validation_files: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderErrorBody>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /create-model`, forwarded as the fine-tune creation request.
///
/// Null fields are omitted so the provider applies its own defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateModelRequest {
    pub training_file: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_epochs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_loss_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_classification_metrics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_n_classes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_positive_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_betas: Option<Vec<f64>>,
}

/// Result of deleting a fine-tuned model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModelResponse {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderErrorBody>,
}

/// Uploaded file as reported by the provider's files API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_details: Option<Value>,
}

/// Non-secret settings the front-end renders on its settings page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub api_model: String,
    pub model: String,
    pub timeout_ms: u64,
    pub socks_proxy: String,
    pub https_proxy: String,
    pub balance: String,
}
