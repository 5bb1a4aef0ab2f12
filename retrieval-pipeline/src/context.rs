use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{StorageManager, ARTIFACTS_CONTAINER},
        types::document::Document,
    },
};
use tracing::debug;

use crate::vector_index::FlatL2Index;

/// A searchable chunk set restored from stored artifacts.
#[derive(Debug, Clone)]
pub struct RetrievalContext {
    pub index: FlatL2Index,
    pub chunks: Vec<String>,
}

/// Reads the serialized chunk list of a document.
pub async fn load_chunks(storage: &StorageManager, chunks_path: &str) -> Result<Vec<String>, AppError> {
    let bytes = storage.read(chunks_path, ARTIFACTS_CONTAINER).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Restores the index and chunks of a document, or `None` when it has no retrievable context.
pub async fn load_document_context(
    storage: &StorageManager,
    document: &Document,
) -> Result<Option<RetrievalContext>, AppError> {
    let (Some(index_path), Some(chunks_path)) = (
        document.faiss_index_blob_path.as_deref(),
        document.chunks_blob_path.as_deref(),
    ) else {
        return Ok(None);
    };

    let index_bytes = storage.read(index_path, ARTIFACTS_CONTAINER).await?;
    let index = FlatL2Index::from_bytes(&index_bytes)?;
    let chunks = load_chunks(storage, chunks_path).await?;
    debug!(
        document_id = %document.id,
        vectors = index.len(),
        chunks = chunks.len(),
        "loaded retrieval context"
    );

    Ok(Some(RetrievalContext { index, chunks }))
}

/// The job-wide context built from the aggregated document.
///
/// A job without aggregated chunks has nothing to retrieve from, which is reported as
/// [`AppError::NoRelevantContext`].
pub async fn load_job_context(
    db: &SurrealDbClient,
    storage: &StorageManager,
    job_id: &str,
) -> Result<RetrievalContext, AppError> {
    let aggregated = Document::aggregated_for_job(job_id, db).await?;
    let context = match aggregated {
        Some(document) => load_document_context(storage, &document).await?,
        None => None,
    };

    let context = context.ok_or_else(|| {
        AppError::NoRelevantContext("Aggregated context not available for this job".into())
    })?;
    if context.chunks.is_empty() {
        return Err(AppError::NoRelevantContext(
            "No chunks available for this job".into(),
        ));
    }
    Ok(context)
}

/// Aggregated chunk texts for a job, without the index.
pub async fn load_job_chunks(
    db: &SurrealDbClient,
    storage: &StorageManager,
    job_id: &str,
) -> Result<Vec<String>, AppError> {
    let chunks_path = Document::aggregated_for_job(job_id, db)
        .await?
        .and_then(|document| document.chunks_blob_path)
        .ok_or_else(|| {
            AppError::NoRelevantContext("Aggregated context not available for this job".into())
        })?;
    load_chunks(storage, &chunks_path).await
}
