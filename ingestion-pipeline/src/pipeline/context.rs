use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{ArtifactPaths, Document},
            job::Job,
            job_activity_log::JobActivityLog,
        },
    },
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};
use crate::types::sanitize_segment;

/// Output of one processed file, held until the whole batch has succeeded.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub file_name: String,
    pub document: Document,
    pub chunks: Vec<String>,
    pub jsonl: Option<String>,
}

pub struct UploadContext<'a> {
    pub job: Job,
    /// Job-scoped prefix shared by object storage and scratch space.
    pub namespace: String,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub staged: Vec<StagedFile>,
    pub aggregated_artifacts: ArtifactPaths,
    pub aggregated_document: Option<Document>,
    pub persisted_ids: Vec<String>,
}

impl<'a> UploadContext<'a> {
    pub fn new(
        job: Job,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let namespace = job_namespace(&job.id, &job.name);
        Self {
            job,
            namespace,
            db,
            pipeline_config,
            services,
            staged: Vec::new(),
            aggregated_artifacts: ArtifactPaths::default(),
            aggregated_document: None,
            persisted_ids: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub async fn log(&self, event_type: &str, message: impl Into<String>) {
        JobActivityLog::record(self.db, &self.job.id, event_type, Some(message.into())).await;
    }

    /// Marks the job failed, removes anything already persisted for it and hands the error back.
    pub async fn abort(&mut self, err: AppError) -> AppError {
        error!(
            job_id = %self.job.id,
            namespace = %self.namespace,
            error = %err,
            "upload pipeline aborted"
        );

        for id in std::mem::take(&mut self.persisted_ids) {
            if let Err(delete_err) = self.db.delete_item::<Document>(&id).await {
                error!(
                    job_id = %self.job.id,
                    document_id = %id,
                    error = %delete_err,
                    "failed to roll back document record"
                );
            }
        }

        if let Err(mark_err) = Job::mark_failed(&self.job.id, &err.to_string(), self.db).await {
            error!(
                job_id = %self.job.id,
                error = %mark_err,
                "failed to mark job as failed"
            );
        }

        self.services.release_scratch(&self.namespace).await;
        err
    }
}

/// `job-{id}-{name}`, with the name reduced to a safe path segment.
pub fn job_namespace(job_id: &str, job_name: &str) -> String {
    format!("job-{job_id}-{}", sanitize_segment(job_name, "job"))
}
