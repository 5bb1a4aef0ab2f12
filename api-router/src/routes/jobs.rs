use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{ARTIFACTS_CONTAINER, DOCUMENTS_CONTAINER, LOGS_CONTAINER},
        types::{
            document::Document,
            finetuned_model::FineTunedModel,
            job::{Job, JobStatus},
            job_activity_log::JobActivityLog,
        },
    },
};
use ingestion_pipeline::{job_namespace, response_log_prefix};
use serde::Serialize;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

/// A job together with its per-file documents and fine-tune readiness.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub document_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
    pub file_count: u32,
    pub document_count: u32,
    pub is_finetuned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub event_type: String,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub async fn list_job_summaries(db: &SurrealDbClient) -> Result<Vec<JobSummary>, AppError> {
    let jobs = Job::list(db).await?;
    let mut summaries = Vec::with_capacity(jobs.len());
    for job in jobs {
        let document_ids = Document::files_for_job(&job.id, db)
            .await?
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        let is_finetuned = FineTunedModel::ready_model_for_job(&job.id, db)
            .await?
            .is_some();
        summaries.push(JobSummary {
            id: job.id,
            job_name: job.name,
            status: job.status,
            document_ids,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            error_details: job.error_details,
            file_count: job.file_count,
            document_count: job.document_count,
            is_finetuned,
        });
    }
    Ok(summaries)
}

/// The job's trail oldest first; an empty trail is reported as not found.
pub async fn job_log_entries(job_id: &str, db: &SurrealDbClient) -> Result<Vec<LogEntry>, AppError> {
    let entries = JobActivityLog::for_job(job_id, db).await?;
    if entries.is_empty() {
        return Err(AppError::NotFound("No logs found for this job".into()));
    }
    Ok(entries
        .into_iter()
        .map(|entry| LogEntry {
            event_type: entry.event_type,
            message: entry.message,
            timestamp: entry.timestamp,
        })
        .collect())
}

pub async fn list_jobs(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_job_summaries(&state.db).await?))
}

pub async fn get_job_logs(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = job_log_entries(&job_id, &state.db).await?;
    Ok(Json(serde_json::json!({ "job_id": job_id, "logs": logs })))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = Job::get(&job_id, &state.db).await?;
    Job::delete_cascade(&job.id, &state.db).await?;

    let namespace = job_namespace(&job.id, &job.name);
    let prefixes = [
        format!("{DOCUMENTS_CONTAINER}/{namespace}"),
        format!("{ARTIFACTS_CONTAINER}/{namespace}"),
        format!("{LOGS_CONTAINER}/{}", response_log_prefix(&job.id)),
    ];
    for prefix in prefixes {
        if let Err(err) = state.storage.delete_prefix(&prefix).await {
            warn!(job_id = %job.id, prefix = %prefix, error = %err, "failed to delete stored objects");
        }
    }
    info!(job_id = %job.id, "job deleted");

    Ok(StatusCode::NO_CONTENT)
}
