use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use retrieval_pipeline::ChatMode;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub mode: ChatMode,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

fn validate(request: &ChatRequest) -> Result<(), ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::ValidationError("message must not be empty".into()));
    }
    Ok(())
}

pub async fn chat_by_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&request)?;
    let response = state
        .retrieval
        .chat_by_job(&job_id, &request.message, request.mode)
        .await?;
    Ok(Json(ChatResponse { response }))
}

pub async fn chat_by_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&request)?;
    let response = state
        .retrieval
        .chat_by_document(&document_id, &request.message)
        .await?;
    Ok(Json(ChatResponse { response }))
}

pub async fn evaluate_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.retrieval.evaluate_model(&job_id).await?))
}
