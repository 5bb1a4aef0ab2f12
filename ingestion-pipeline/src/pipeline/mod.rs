mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use context::job_namespace;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, IndexArtifacts, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{document::Document, job::Job, job_activity_log::JobActivityLog},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::LlmProvider},
};
use serde::Serialize;
use tracing::info;

use self::{
    context::UploadContext,
    stages::{aggregate, finalize, map_guard_error, process_files},
    state::ready,
};
use crate::{
    synthetic::{StorageResponseSink, SyntheticGenerator, SyntheticSettings},
    types::UploadedFile,
    utils::file_text_extraction::MediaType,
};

/// Records created by a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub job: Job,
    pub documents: Vec<Document>,
    pub aggregated: Document,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        llm: Arc<dyn LlmProvider>,
        config: &AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let synthetic = SyntheticGenerator::new(
            llm,
            Arc::new(StorageResponseSink::new(storage.clone())),
            SyntheticSettings {
                model: config.chat_model.clone(),
                max_attempts: config.synthetic_max_attempts,
                ..SyntheticSettings::default()
            },
        );
        let services = DefaultPipelineServices::new(storage, embedding_provider, synthetic);

        Self::with_services(
            db,
            IngestionConfig::from_app_config(config),
            Arc::new(services),
        )
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            pipeline_config,
            services,
        })
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Turns an uploaded batch into a completed job with per-file and aggregated documents.
    ///
    /// Empty batches and unsupported media types are rejected before anything is stored.
    /// Any later failure marks the job failed and leaves no document records behind.
    #[tracing::instrument(skip_all, fields(job_name = %job_name, files = files.len()))]
    pub async fn upload(
        &self,
        job_name: &str,
        files: Vec<UploadedFile>,
    ) -> Result<UploadOutcome, AppError> {
        if files.is_empty() {
            return Err(AppError::EmptyUpload);
        }
        let typed_files = files
            .into_iter()
            .map(|file| {
                let media_type = MediaType::from_declared(&file.content_type)?;
                Ok((file, media_type))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let file_count = u32::try_from(typed_files.len()).unwrap_or(u32::MAX);
        let job = Job::create(job_name.to_string(), file_count, &self.db).await?;
        JobActivityLog::record(
            &self.db,
            &job.id,
            "job_created",
            Some(format!(
                "Created job with {file_count} file(s) and name '{job_name}'"
            )),
        )
        .await;

        let mut ctx = UploadContext::new(
            job,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );
        let machine = ready()
            .create_job()
            .map_err(|(_, guard)| map_guard_error("create_job", &guard))?;

        let started = Instant::now();

        let machine = match process_files(machine, &mut ctx, typed_files).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };
        let files_ms = Self::duration_millis(started.elapsed());

        let stage_start = Instant::now();
        let machine = match aggregate(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };
        let aggregate_ms = Self::duration_millis(stage_start.elapsed());

        let _machine = match finalize(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };

        self.services.release_scratch(&ctx.namespace).await;

        info!(
            job_id = %ctx.job.id,
            total_ms = Self::duration_millis(started.elapsed()),
            files_ms,
            aggregate_ms,
            "upload pipeline finished"
        );

        let aggregated = ctx
            .aggregated_document
            .take()
            .ok_or_else(|| AppError::InternalError("aggregated document missing".into()))?;
        Ok(UploadOutcome {
            documents: ctx.staged.into_iter().map(|staged| staged.document).collect(),
            aggregated,
            job: ctx.job,
        })
    }
}
