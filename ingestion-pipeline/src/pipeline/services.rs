use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::{StorageManager, ARTIFACTS_CONTAINER, DOCUMENTS_CONTAINER},
    utils::embedding::EmbeddingProvider,
};
use tracing::{debug, warn};

use crate::{
    synthetic::SyntheticGenerator,
    utils::file_text_extraction::{extract_text_from_file, MediaType},
};

/// Serialized index plus the chunk list it was built over.
#[derive(Debug, Clone)]
pub struct IndexArtifacts {
    pub index_bytes: Vec<u8>,
    pub chunks_json: String,
}

/// The external work an upload performs, behind one seam so it can be replaced in tests.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    /// Stores an original upload and returns its locator.
    async fn store_original(&self, bytes: Bytes, path: &str) -> Result<String, AppError>;

    /// Fetches a stored original back to local disk and extracts its text.
    async fn extract_text(&self, locator: &str, media_type: MediaType) -> Result<String, AppError>;

    async fn generate_jsonl(&self, job_id: &str, chunks: &[String]) -> Result<String, AppError>;

    async fn build_index(&self, chunks: &[String]) -> Result<Option<IndexArtifacts>, AppError>;

    /// Stores a derived artifact and returns its locator.
    async fn store_artifact(&self, bytes: Vec<u8>, path: &str) -> Result<String, AppError>;

    /// Best-effort removal of a job's scratch namespace.
    async fn release_scratch(&self, namespace: &str);
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    embedding: Arc<EmbeddingProvider>,
    synthetic: SyntheticGenerator,
}

impl DefaultPipelineServices {
    pub fn new(
        storage: StorageManager,
        embedding: Arc<EmbeddingProvider>,
        synthetic: SyntheticGenerator,
    ) -> Self {
        Self {
            storage,
            embedding,
            synthetic,
        }
    }

    /// Deletes a fetched copy, but only when it lives in scratch space.
    async fn discard_scratch_copy(&self, path: &Path) {
        if !path.starts_with(self.storage.scratch_root()) {
            return;
        }
        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %err, "failed to remove scratch copy");
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn store_original(&self, bytes: Bytes, path: &str) -> Result<String, AppError> {
        self.storage.put(bytes, path, DOCUMENTS_CONTAINER).await
    }

    async fn extract_text(&self, locator: &str, media_type: MediaType) -> Result<String, AppError> {
        let local_path = self.storage.get(locator, DOCUMENTS_CONTAINER).await?;
        let extracted = extract_text_from_file(&local_path, media_type).await;
        self.discard_scratch_copy(&local_path).await;
        extracted
    }

    async fn generate_jsonl(&self, job_id: &str, chunks: &[String]) -> Result<String, AppError> {
        Ok(self.synthetic.generate(job_id, chunks).await)
    }

    async fn build_index(&self, chunks: &[String]) -> Result<Option<IndexArtifacts>, AppError> {
        let Some(built) = retrieval_pipeline::build_index(&self.embedding, chunks).await? else {
            return Ok(None);
        };
        let index_bytes = built.index_bytes().await?;
        debug!(
            vectors = built.index.len(),
            bytes = index_bytes.len(),
            "serialized chunk index"
        );
        Ok(Some(IndexArtifacts {
            index_bytes,
            chunks_json: built.chunks_json,
        }))
    }

    async fn store_artifact(&self, bytes: Vec<u8>, path: &str) -> Result<String, AppError> {
        self.storage.put(bytes, path, ARTIFACTS_CONTAINER).await
    }

    async fn release_scratch(&self, namespace: &str) {
        self.storage
            .remove_scratch_dir_if_empty(&format!("{DOCUMENTS_CONTAINER}/{namespace}"))
            .await;
    }
}
