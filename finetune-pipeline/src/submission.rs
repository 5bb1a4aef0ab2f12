use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{StorageManager, ARTIFACTS_CONTAINER},
        types::{finetuned_model::FineTunedModel, job::Job},
    },
    utils::llm::LlmProvider,
};
use tracing::{debug, error, info, warn};

/// Concatenates the JSONL artifacts, one trailing newline after each.
pub(crate) async fn combine_jsonl(
    storage: &StorageManager,
    jsonl_paths: &[String],
) -> Result<Vec<u8>, AppError> {
    let mut combined = Vec::new();
    for path in jsonl_paths {
        debug!(path = %path, "reading training artifact");
        let bytes = storage.read(path, ARTIFACTS_CONTAINER).await?;
        combined.extend_from_slice(&bytes);
        combined.push(b'\n');
    }
    Ok(combined)
}

async fn upload_and_submit(
    db: &SurrealDbClient,
    storage: &StorageManager,
    llm: &dyn LlmProvider,
    job_id: &str,
    jsonl_paths: &[String],
    base_model: &str,
) -> Result<FineTunedModel, AppError> {
    let combined = combine_jsonl(storage, jsonl_paths).await?;

    // Removed on drop, whichever way this function returns.
    let training_file = tempfile::Builder::new()
        .prefix(&format!("combined_{job_id}_"))
        .suffix(".jsonl")
        .tempfile()?;
    tokio::fs::write(training_file.path(), &combined).await?;

    debug!(job_id = %job_id, bytes = combined.len(), "uploading combined training file");
    let file_id = llm.upload_training_file(training_file.path()).await?;

    info!(job_id = %job_id, model = %base_model, "starting fine-tune");
    let external_job_id = llm.submit_fine_tune(&file_id, base_model).await?;
    info!(job_id = %job_id, external_job_id = %external_job_id, "fine-tune job started");

    let model = FineTunedModel::new(job_id, external_job_id);
    db.store_item(model.clone()).await?;
    Ok(model)
}

/// Uploads the job's training data and submits a fine-tune against `base_model`.
///
/// On failure the job is marked `failed: <error>` and the error is returned.
pub(crate) async fn combine_upload_submit(
    db: &SurrealDbClient,
    storage: &StorageManager,
    llm: &dyn LlmProvider,
    job_id: &str,
    jsonl_paths: &[String],
    base_model: &str,
) -> Result<FineTunedModel, AppError> {
    Job::get(job_id, db).await?;

    match upload_and_submit(db, storage, llm, job_id, jsonl_paths, base_model).await {
        Ok(model) => Ok(model),
        Err(err) => {
            error!(job_id = %job_id, error = %err, "error triggering fine-tune");
            if let Err(mark_err) = Job::mark_failed(job_id, &err.to_string(), db).await {
                warn!(job_id = %job_id, error = %mark_err, "could not mark job failed");
            }
            Err(err)
        }
    }
}
