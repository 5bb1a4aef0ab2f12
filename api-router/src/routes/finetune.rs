use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct FinetuneWithModelRequest {
    pub model: String,
}

/// Queues a fine-tune against the default base model and answers before it is submitted.
pub async fn request_finetune(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state.finetune.request_finetune(&job_id).await?;
    info!(job_id = %job_id, model = %state.finetune.default_model(), "fine-tune queued");

    // The submission runs detached; its outcome lands on the job record.
    drop(queued.task);
    Ok((StatusCode::ACCEPTED, Json(queued.job)))
}

pub async fn finetune_with_model(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(request): Json<FinetuneWithModelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.model.trim().is_empty() {
        return Err(ApiError::ValidationError("model must not be empty".into()));
    }
    let job = state
        .finetune
        .finetune_with_model(&job_id, &request.model)
        .await?;
    Ok(Json(job))
}

pub async fn finetune_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.finetune.check_status(&job_id).await?))
}
