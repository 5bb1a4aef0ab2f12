use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

/// `file_type` of the single job-wide aggregated record.
pub const AGGREGATED_FILE_TYPE: &str = "aggregated";

/// Object-store locations of the artifacts derived from one file or from a whole job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub jsonl: Option<String>,
    pub faiss_index: Option<String>,
    pub chunks: Option<String>,
}

stored_object!(Document, "document", {
    job_id: String,
    blob_path: String,
    file_type: String,
    #[serde(default)]
    jsonl_blob_path: Option<String>,
    #[serde(default)]
    faiss_index_blob_path: Option<String>,
    #[serde(default)]
    chunks_blob_path: Option<String>,
    is_aggregated: bool
});

impl Document {
    fn build(
        job_id: &str,
        blob_path: String,
        file_type: String,
        artifacts: ArtifactPaths,
        is_aggregated: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            blob_path,
            file_type,
            jsonl_blob_path: artifacts.jsonl,
            faiss_index_blob_path: artifacts.faiss_index,
            chunks_blob_path: artifacts.chunks,
            is_aggregated,
        }
    }

    /// Record for one uploaded file.
    pub fn for_file(
        job_id: &str,
        blob_path: String,
        file_type: String,
        artifacts: ArtifactPaths,
    ) -> Self {
        Self::build(job_id, blob_path, file_type, artifacts, false)
    }

    /// The job-wide record; it never points at an original file.
    pub fn aggregated(job_id: &str, artifacts: ArtifactPaths) -> Self {
        Self::build(
            job_id,
            String::new(),
            AGGREGATED_FILE_TYPE.to_string(),
            artifacts,
            true,
        )
    }

    pub fn artifacts(&self) -> ArtifactPaths {
        ArtifactPaths {
            jsonl: self.jsonl_blob_path.clone(),
            faiss_index: self.faiss_index_blob_path.clone(),
            chunks: self.chunks_blob_path.clone(),
        }
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
    }

    pub async fn aggregated_for_job(
        job_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut docs: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id AND is_aggregated = true ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(docs.pop())
    }

    /// Per-file records of a job in creation order.
    pub async fn files_for_job(job_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let docs: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id AND is_aggregated = false ORDER BY created_at ASC, id ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(docs)
    }

    pub async fn count_for_job(job_id: &str, db: &SurrealDbClient) -> Result<usize, AppError> {
        let all: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE job_id = $job_id")
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(all.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.ensure_initialized().await.expect("init schema");
        db
    }

    #[test]
    fn aggregated_record_has_no_blob_path() {
        let doc = Document::aggregated(
            "job-1",
            ArtifactPaths {
                jsonl: Some("artifacts/x.jsonl".into()),
                ..Default::default()
            },
        );
        assert!(doc.is_aggregated);
        assert!(doc.blob_path.is_empty());
        assert_eq!(doc.file_type, AGGREGATED_FILE_TYPE);
        assert_eq!(doc.artifacts().jsonl.as_deref(), Some("artifacts/x.jsonl"));
        assert!(doc.artifacts().chunks.is_none());
    }

    #[tokio::test]
    async fn queries_split_file_and_aggregated_records() {
        let db = memory_db().await;
        let first = Document::for_file(
            "job-1",
            "documents/job-1-demo/a.txt".into(),
            "text/plain".into(),
            ArtifactPaths::default(),
        );
        let second = Document::for_file(
            "job-1",
            "documents/job-1-demo/b.txt".into(),
            "text/plain".into(),
            ArtifactPaths::default(),
        );
        let aggregated = Document::aggregated("job-1", ArtifactPaths::default());
        let unrelated = Document::aggregated("job-2", ArtifactPaths::default());

        for doc in [first.clone(), second.clone(), aggregated.clone(), unrelated] {
            db.store_item(doc).await.expect("store document");
        }

        let files = Document::files_for_job("job-1", &db).await.expect("files");
        assert_eq!(
            files.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec![first.id.as_str(), second.id.as_str()]
        );

        let found = Document::aggregated_for_job("job-1", &db)
            .await
            .expect("aggregated")
            .expect("aggregated exists");
        assert_eq!(found.id, aggregated.id);
        assert_eq!(Document::count_for_job("job-1", &db).await.expect("count"), 3);
        assert!(Document::aggregated_for_job("job-3", &db)
            .await
            .expect("query")
            .is_none());
    }
}
