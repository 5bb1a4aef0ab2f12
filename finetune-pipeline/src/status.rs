use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            finetuned_model::FineTunedModel,
            job::{Job, JobStatus},
            job_activity_log::JobActivityLog,
        },
    },
    utils::llm::LlmProvider,
};
use serde::Serialize;
use tracing::info;

pub const NOT_RUN: &str = "not_run";
const SUCCEEDED: &str = "succeeded";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinetuneStatusReport {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_job_id: Option<String>,
    pub status: String,
    pub fine_tuned_model_id: Option<String>,
}

impl FinetuneStatusReport {
    fn not_run(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            openai_job_id: None,
            status: NOT_RUN.to_string(),
            fine_tuned_model_id: None,
        }
    }
}

/// Polls the provider for the latest attempt and persists any change.
///
/// Repeating the call without a provider-side change writes nothing.
pub(crate) async fn refresh_status(
    db: &SurrealDbClient,
    llm: &dyn LlmProvider,
    job_id: &str,
) -> Result<FinetuneStatusReport, AppError> {
    let job = Job::get(job_id, db).await?;

    let Some(model) = FineTunedModel::latest_for_job(job_id, db).await? else {
        return Ok(FinetuneStatusReport::not_run(job_id));
    };
    let Some(external_job_id) = model.openai_job_id.clone() else {
        return Ok(FinetuneStatusReport::not_run(job_id));
    };

    let remote = llm.fine_tune_status(&external_job_id).await?;

    if job.status.to_string() != remote.status {
        JobActivityLog::record(
            db,
            job_id,
            &format!("finetune_{}", remote.status),
            Some(format!("Finetune job status updated to '{}'", remote.status)),
        )
        .await;
        info!(
            job_id = %job_id,
            from = %job.status,
            to = %remote.status,
            "updating job status"
        );
        Job::set_status(job_id, &JobStatus::from(remote.status.clone()), db).await?;
    }

    if remote.status == SUCCEEDED && model.openai_model_id != remote.fine_tuned_model {
        info!(
            job_id = %job_id,
            model_id = ?remote.fine_tuned_model,
            "recording fine-tuned model id"
        );
        JobActivityLog::record(
            db,
            job_id,
            "finetune_succeeded",
            Some("Finetune job succeeded".into()),
        )
        .await;
        FineTunedModel::set_model_id(&model.id, remote.fine_tuned_model.clone(), db).await?;
    }

    Ok(FinetuneStatusReport {
        job_id: job_id.to_string(),
        openai_job_id: Some(external_job_id),
        status: remote.status,
        fine_tuned_model_id: remote.fine_tuned_model,
    })
}
