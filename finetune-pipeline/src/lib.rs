#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod resources;
mod status;
mod submission;

pub use resources::{FinetuneResources, ResourceProvider, SharedResources};
pub use status::{FinetuneStatusReport, NOT_RUN};

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::Document,
            finetuned_model::FineTunedModel,
            job::{Job, JobStatus},
            job_activity_log::JobActivityLog,
        },
    },
    utils::llm::LlmProvider,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::submission::combine_upload_submit;

/// A deferred fine-tune: the job as it was when queued and the background submission.
pub struct QueuedFinetune {
    pub job: Job,
    pub task: JoinHandle<Result<FineTunedModel, AppError>>,
}

/// Submits a job's aggregated training data to the fine-tuning provider and tracks the result.
#[derive(Clone)]
pub struct FinetunePipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    llm: Arc<dyn LlmProvider>,
    resources: Arc<dyn ResourceProvider>,
    default_model: String,
}

impl FinetunePipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        llm: Arc<dyn LlmProvider>,
        resources: Arc<dyn ResourceProvider>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            storage,
            llm,
            resources,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn aggregated_jsonl(&self, job_id: &str) -> Result<String, AppError> {
        Document::aggregated_for_job(job_id, &self.db)
            .await?
            .and_then(|doc| doc.jsonl_blob_path)
            .ok_or_else(|| AppError::AggregatedArtifactMissing(job_id.to_string()))
    }

    /// Marks the job `finetune pending` and submits against the default base model in a
    /// background task that acquires its own handles.
    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    pub async fn request_finetune(&self, job_id: &str) -> Result<QueuedFinetune, AppError> {
        let jsonl_path = self.aggregated_jsonl(job_id).await?;
        JobActivityLog::record(
            &self.db,
            job_id,
            "finetune_requested",
            Some("Finetune job requested".into()),
        )
        .await;

        let mut job = Job::get(job_id, &self.db).await?;
        Job::set_status(job_id, &JobStatus::FinetunePending, &self.db).await?;
        job.status = JobStatus::FinetunePending;
        JobActivityLog::record(
            &self.db,
            job_id,
            "finetune_queued",
            Some("Finetune process queued in background".into()),
        )
        .await;

        let task = tokio::spawn(run_background(
            Arc::clone(&self.resources),
            Arc::clone(&self.llm),
            job_id.to_string(),
            vec![jsonl_path],
            self.default_model.clone(),
        ));

        Ok(QueuedFinetune { job, task })
    }

    /// Submits against `model` before returning and marks the job `finetune in progress`.
    #[tracing::instrument(skip_all, fields(job_id = %job_id, model = %model))]
    pub async fn finetune_with_model(&self, job_id: &str, model: &str) -> Result<Job, AppError> {
        JobActivityLog::record(
            &self.db,
            job_id,
            "finetune_requested",
            Some(format!("Finetune job requested with model {model}")),
        )
        .await;
        let jsonl_path = self.aggregated_jsonl(job_id).await?;

        combine_upload_submit(
            &self.db,
            &self.storage,
            self.llm.as_ref(),
            job_id,
            &[jsonl_path],
            model,
        )
        .await?;

        Job::set_status(job_id, &JobStatus::FinetuneInProgress, &self.db).await?;
        JobActivityLog::record(
            &self.db,
            job_id,
            "finetune_queued",
            Some(format!("Finetune job triggered with model {model}")),
        )
        .await;
        Job::get(job_id, &self.db).await
    }

    /// Current provider status of the job's latest fine-tune attempt.
    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    pub async fn check_status(&self, job_id: &str) -> Result<FinetuneStatusReport, AppError> {
        status::refresh_status(&self.db, self.llm.as_ref(), job_id).await
    }
}

async fn run_background(
    resources: Arc<dyn ResourceProvider>,
    llm: Arc<dyn LlmProvider>,
    job_id: String,
    jsonl_paths: Vec<String>,
    base_model: String,
) -> Result<FineTunedModel, AppError> {
    let result = async {
        let FinetuneResources { db, storage } = resources.acquire().await?;
        let model = combine_upload_submit(
            &db,
            &storage,
            llm.as_ref(),
            &job_id,
            &jsonl_paths,
            &base_model,
        )
        .await?;
        Job::set_status(&job_id, &JobStatus::FinetuneInProgress, &db).await?;
        Ok(model)
    }
    .await;

    match &result {
        Ok(_) => info!(job_id = %job_id, "background fine-tune triggered"),
        Err(err) => error!(job_id = %job_id, error = %err, "background fine-tune failed"),
    }
    result
}
