use common::{
    error::AppError,
    storage::types::{
        document::{ArtifactPaths, Document},
        job::Job,
    },
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    context::{StagedFile, UploadContext},
    services::IndexArtifacts,
    state::{Aggregated, Completed, FilesProcessed, JobCreated, UploadMachine},
};
use crate::{
    types::UploadedFile,
    utils::{chunking::chunk_text, file_text_extraction::MediaType},
};

/// Runs every file through storage, parsing, generation and indexing, in order.
///
/// The first failing file stops the batch; nothing is persisted for any file.
#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job.id, files = files.len()))]
pub async fn process_files(
    machine: UploadMachine<(), JobCreated>,
    ctx: &mut UploadContext<'_>,
    files: Vec<(UploadedFile, MediaType)>,
) -> Result<UploadMachine<(), FilesProcessed>, AppError> {
    for (position, (file, media_type)) in files.into_iter().enumerate() {
        let file_name = file.file_name.clone();
        ctx.log("file_upload_started", format!("Processing file: {file_name}"))
            .await;

        match process_file(ctx, position, file, media_type).await {
            Ok(staged) => {
                debug!(
                    job_id = %ctx.job.id,
                    file_name = %staged.file_name,
                    chunks = staged.chunks.len(),
                    has_jsonl = staged.jsonl.is_some(),
                    "file processed"
                );
                ctx.staged.push(staged);
            }
            Err(err) => {
                ctx.log(
                    "file_processing_failed",
                    format!("Error processing {file_name}: {err}"),
                )
                .await;
                return Err(AppError::for_file(file_name, err));
            }
        }
    }

    machine
        .process_files()
        .map_err(|(_, guard)| map_guard_error("process_files", &guard))
}

/// Object keys carry the file's batch position so repeated file names never collide.
async fn process_file(
    ctx: &UploadContext<'_>,
    position: usize,
    file: UploadedFile,
    media_type: MediaType,
) -> Result<StagedFile, AppError> {
    let job_id = ctx.job_id().to_string();
    let storage_name = format!("{position}_{}", file.storage_name());
    let folder = &ctx.namespace;

    let blob_path = ctx
        .services
        .store_original(file.bytes, &format!("{folder}/{storage_name}"))
        .await?;

    let text = ctx.services.extract_text(&blob_path, media_type).await?;
    let chunks = chunk_text(&text, ctx.pipeline_config.tuning.chunk_size);

    let jsonl = if chunks.is_empty() {
        None
    } else {
        Some(ctx.services.generate_jsonl(&job_id, &chunks).await?)
    };

    let mut artifacts = ArtifactPaths::default();
    if let Some(index) = ctx.services.build_index(&chunks).await? {
        let (faiss, chunks_path) = store_index(
            ctx,
            index,
            &format!("{folder}/faiss/{job_id}_{storage_name}_index.bin"),
            &format!("{folder}/chunks/{job_id}_{storage_name}_chunks.json"),
        )
        .await?;
        artifacts.faiss_index = Some(faiss);
        artifacts.chunks = Some(chunks_path);
    }

    if let Some(jsonl) = jsonl.as_deref().filter(|j| !j.is_empty()) {
        let path = ctx
            .services
            .store_artifact(
                jsonl.as_bytes().to_vec(),
                &format!("{folder}/jsonl/{job_id}_{storage_name}_combined.jsonl"),
            )
            .await?;
        artifacts.jsonl = Some(path);
    }

    Ok(StagedFile {
        file_name: file.file_name,
        document: Document::for_file(&job_id, blob_path, file.content_type, artifacts),
        chunks,
        jsonl,
    })
}

async fn store_index(
    ctx: &UploadContext<'_>,
    index: IndexArtifacts,
    index_path: &str,
    chunks_path: &str,
) -> Result<(String, String), AppError> {
    let faiss = ctx
        .services
        .store_artifact(index.index_bytes, index_path)
        .await?;
    let chunks = ctx
        .services
        .store_artifact(index.chunks_json.into_bytes(), chunks_path)
        .await?;
    Ok((faiss, chunks))
}

/// Builds and uploads the job-wide JSONL, index and chunk list.
#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job.id))]
pub async fn aggregate(
    machine: UploadMachine<(), FilesProcessed>,
    ctx: &mut UploadContext<'_>,
) -> Result<UploadMachine<(), Aggregated>, AppError> {
    let job_id = ctx.job_id().to_string();
    let folder = ctx.namespace.clone();

    let jsonl_parts: Vec<&str> = ctx
        .staged
        .iter()
        .filter_map(|staged| staged.jsonl.as_deref())
        .collect();
    let all_chunks: Vec<String> = ctx
        .staged
        .iter()
        .flat_map(|staged| staged.chunks.iter().cloned())
        .collect();

    let mut artifacts = ArtifactPaths::default();

    if !jsonl_parts.is_empty() {
        let combined = jsonl_parts.join("\n");
        let path = ctx
            .services
            .store_artifact(
                combined.into_bytes(),
                &format!("{folder}/jsonl/{job_id}_combined.jsonl"),
            )
            .await?;
        ctx.log(
            "aggregated_jsonl_created",
            format!("Aggregated JSONL uploaded to {path}"),
        )
        .await;
        artifacts.jsonl = Some(path);
    }

    if let Some(index) = ctx.services.build_index(&all_chunks).await? {
        let (faiss, chunks_path) = store_index(
            ctx,
            index,
            &format!("{folder}/faiss/{job_id}_combined.bin"),
            &format!("{folder}/chunks/{job_id}_combined.json"),
        )
        .await?;
        ctx.log(
            "aggregated_faiss_created",
            format!("Aggregated FAISS uploaded to {faiss}"),
        )
        .await;
        ctx.log(
            "aggregated_chunks_created",
            format!("Aggregated chunks uploaded to {chunks_path}"),
        )
        .await;
        artifacts.faiss_index = Some(faiss);
        artifacts.chunks = Some(chunks_path);
    }

    debug!(
        job_id = %job_id,
        total_chunks = all_chunks.len(),
        has_jsonl = artifacts.jsonl.is_some(),
        "aggregated job artifacts"
    );
    ctx.aggregated_artifacts = artifacts;

    machine
        .aggregate()
        .map_err(|(_, guard)| map_guard_error("aggregate", &guard))
}

/// Persists every staged document plus the aggregated one and completes the job.
#[instrument(level = "trace", skip_all, fields(job_id = %ctx.job.id))]
pub async fn finalize(
    machine: UploadMachine<(), Aggregated>,
    ctx: &mut UploadContext<'_>,
) -> Result<UploadMachine<(), Completed>, AppError> {
    let job_id = ctx.job_id().to_string();

    for staged in ctx.staged.clone() {
        let id = staged.document.id.clone();
        ctx.db.store_item(staged.document).await?;
        ctx.persisted_ids.push(id);
        ctx.log(
            "document_created",
            format!("Document record created for file {}", staged.file_name),
        )
        .await;
    }

    let aggregated = Document::aggregated(&job_id, ctx.aggregated_artifacts.clone());
    ctx.db.store_item(aggregated.clone()).await?;
    ctx.persisted_ids.push(aggregated.id.clone());
    ctx.aggregated_document = Some(aggregated);
    ctx.log(
        "aggregated_document_created",
        "Aggregated document record created",
    )
    .await;

    let document_count = u32::try_from(ctx.staged.len()).unwrap_or(u32::MAX);
    ctx.job = Job::mark_completed(&job_id, document_count, ctx.db).await?;
    ctx.log(
        "job_completed",
        format!("Job completed with {document_count} document(s)"),
    )
    .await;
    info!(job_id = %job_id, document_count, "upload job completed");

    machine
        .complete()
        .map_err(|(_, guard)| map_guard_error("complete", &guard))
}

pub(super) fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid upload pipeline transition during {event}: {guard:?}"
    ))
}
