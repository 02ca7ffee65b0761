//! HTTP request handlers.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::Json;

use super::auth::secret_matches;
use super::server::AppState;
use super::stream::relay_chat;
use super::types::{
    CancelModelRequest, DeleteModelRequest, Envelope, JsonBody, ModelDetailRequest, SessionData,
    VerifyRequest,
};
use super::upload::store_upload;
use crate::error::{Error, Result};
use crate::provider::types::{
    ChatConfig, CreateModelRequest, DeleteModelResponse, FileObject, ListResponse, ModelInfo,
    ModelRecord,
};
use crate::provider::ChatRequest;

type EnvelopeResult<T> = Result<Json<Envelope<T>>>;

/// Handle POST /chat-process
pub async fn chat_process(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Response> {
    if request.prompt.trim().is_empty() {
        return Err(Error::Validation("Prompt is empty".to_string()));
    }

    tracing::info!(
        conversation = ?request.options.conversation_id,
        parent = ?request.options.parent_message_id,
        model = ?request.completion_params.as_ref().map(|p| p.model.as_str()),
        "Received chat request"
    );

    Ok(relay_chat(state.provider.clone(), request))
}

/// Handle POST /models
pub async fn models(State(state): State<AppState>) -> EnvelopeResult<ListResponse<ModelInfo>> {
    let models = state.provider.get_models().await?;
    Ok(Json(Envelope::success(models)))
}

/// Handle GET /list
pub async fn list(State(state): State<AppState>) -> EnvelopeResult<ListResponse<ModelRecord>> {
    let jobs = state.provider.get_list().await?;
    Ok(Json(Envelope::success(jobs)))
}

/// Handle POST /model-detail
pub async fn model_detail(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ModelDetailRequest>,
) -> EnvelopeResult<ModelRecord> {
    let record = state.provider.get_model_detail(&body.id).await?;
    Ok(Json(Envelope::success(record)))
}

/// Handle POST /create-model
pub async fn create_model(
    State(state): State<AppState>,
    JsonBody(job): JsonBody<CreateModelRequest>,
) -> EnvelopeResult<ModelRecord> {
    tracing::info!(
        model = %job.model,
        training_file = %job.training_file,
        "Creating fine-tune"
    );
    let record = state.provider.create_model(&job).await?;
    Ok(Json(Envelope::success(record)))
}

/// Handle POST /cancel-model
pub async fn cancel_model(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CancelModelRequest>,
) -> EnvelopeResult<ModelRecord> {
    let record = state.provider.cancel_model(&body.id).await?;
    Ok(Json(Envelope::success(record)))
}

/// Handle POST /delete-model
pub async fn delete_model(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<DeleteModelRequest>,
) -> EnvelopeResult<DeleteModelResponse> {
    let deleted = state.provider.delete_model(&body.fine_tuned_model).await?;
    Ok(Json(Envelope::success(deleted)))
}

/// Handle POST /config
pub async fn config(State(state): State<AppState>) -> EnvelopeResult<ChatConfig> {
    Ok(Json(Envelope::success(state.provider.chat_config().await)))
}

/// Handle POST /session
pub async fn session(State(state): State<AppState>) -> Json<Envelope<SessionData>> {
    Json(Envelope::success(SessionData {
        auth: state.config.auth.is_enabled(),
        model: state.provider.api_model().to_string(),
    }))
}

/// Handle POST /verify
///
/// Checks a token against the configured secret without side effects.
pub async fn verify(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<VerifyRequest>,
) -> EnvelopeResult<()> {
    let token = body.token.as_str();
    if token.is_empty() {
        return Err(Error::Validation("Secret key is empty".to_string()));
    }

    match state.config.auth.secret() {
        Some(secret) if secret_matches(token, secret) => Ok(Json(
            Envelope::success_with_message("Verify successfully", None),
        )),
        _ => Err(Error::InvalidSecret),
    }
}

/// Handle POST /prepare-data
///
/// Stores the uploaded file, then hands it to the provider as training data.
pub async fn prepare_data(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> EnvelopeResult<FileObject> {
    let multipart = multipart.map_err(|e| Error::Upload(e.body_text()))?;
    let upload_dir = std::path::Path::new(&state.config.server.upload_dir);
    let stored = store_upload(multipart, upload_dir).await?;
    tracing::info!(
        file = %stored.original_name,
        bytes = stored.size,
        path = %stored.path.display(),
        "Received training data"
    );

    let file = state
        .provider
        .upload_training_file(&stored.path, &stored.original_name)
        .await?;
    Ok(Json(Envelope::success(file)))
}
