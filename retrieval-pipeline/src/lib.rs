#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chat;
pub mod context;
pub mod evaluation;
pub mod vector_index;

use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{embedding::EmbeddingProvider, llm::LlmProvider},
};

pub use chat::ChatMode;
pub use context::RetrievalContext;
pub use evaluation::EvaluationReport;
pub use vector_index::{build_index, query, BuiltIndex, FlatL2Index};

/// Answers questions against the artifacts produced by ingestion.
#[derive(Clone)]
pub struct RetrievalService {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    embedding: Arc<EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
}

impl RetrievalService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        embedding: Arc<EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            storage,
            embedding,
            llm,
            chat_model: chat_model.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, path::Path, sync::Arc};

    use async_trait::async_trait;
    use common::{
        error::AppError,
        storage::{
            db::SurrealDbClient,
            store::{testing::TestStorageManager, ARTIFACTS_CONTAINER},
            types::document::{ArtifactPaths, Document},
        },
        utils::{
            embedding::EmbeddingProvider,
            llm::{ChatMessage, ChatOptions, FineTuneStatus, LlmProvider},
        },
    };
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::{vector_index::build_index, RetrievalService};

    /// Records every chat call and answers from a script, falling back to a fixed reply.
    pub struct ScriptedLlm {
        pub calls: Mutex<Vec<(String, Vec<ChatMessage>, ChatOptions)>>,
        replies: Mutex<VecDeque<Result<String, String>>>,
        default_reply: String,
    }

    impl ScriptedLlm {
        pub fn new(default_reply: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
                default_reply: default_reply.to_string(),
            }
        }

        pub async fn push_reply(&self, reply: Result<&str, &str>) {
            self.replies
                .lock()
                .await
                .push_back(reply.map(str::to_string).map_err(str::to_string));
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn chat(
            &self,
            model: &str,
            messages: Vec<ChatMessage>,
            options: ChatOptions,
        ) -> Result<String, AppError> {
            self.calls
                .lock()
                .await
                .push((model.to_string(), messages, options));
            match self.replies.lock().await.pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(AppError::Processing(message)),
                None => Ok(self.default_reply.clone()),
            }
        }

        async fn upload_training_file(&self, _path: &Path) -> Result<String, AppError> {
            Err(AppError::Processing("not used in retrieval tests".into()))
        }

        async fn submit_fine_tune(&self, _file_id: &str, _base: &str) -> Result<String, AppError> {
            Err(AppError::Processing("not used in retrieval tests".into()))
        }

        async fn fine_tune_status(&self, _id: &str) -> Result<FineTuneStatus, AppError> {
            Err(AppError::Processing("not used in retrieval tests".into()))
        }
    }

    pub struct Harness {
        pub db: Arc<SurrealDbClient>,
        pub storage: TestStorageManager,
        pub embedding: Arc<EmbeddingProvider>,
        pub llm: Arc<ScriptedLlm>,
        pub service: RetrievalService,
    }

    impl Harness {
        pub async fn new(default_reply: &str) -> Self {
            let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("memory db");
            db.ensure_initialized().await.expect("init");
            let db = Arc::new(db);
            let storage = TestStorageManager::new_memory().await.expect("storage");
            let embedding = Arc::new(EmbeddingProvider::new_hashed(256));
            let llm = Arc::new(ScriptedLlm::new(default_reply));
            let service = RetrievalService::new(
                Arc::clone(&db),
                storage.clone_storage(),
                Arc::clone(&embedding),
                Arc::clone(&llm) as Arc<dyn LlmProvider>,
                "test-chat-model",
            );
            Self {
                db,
                storage,
                embedding,
                llm,
                service,
            }
        }

        /// Stores index and chunk artifacts and returns a document pointing at them.
        pub async fn document_with_chunks(
            &self,
            job_id: &str,
            chunks: &[&str],
            aggregated: bool,
        ) -> Document {
            let chunks: Vec<String> = chunks.iter().map(|c| (*c).to_string()).collect();
            let built = build_index(&self.embedding, &chunks)
                .await
                .expect("build")
                .expect("index");
            let prefix = Uuid::new_v4();
            let storage = self.storage.storage();
            let faiss = storage
                .put(
                    built.index_bytes().await.expect("bytes"),
                    &format!("{prefix}/faiss/index.bin"),
                    ARTIFACTS_CONTAINER,
                )
                .await
                .expect("put index");
            let chunks_path = storage
                .put(
                    built.chunks_json.into_bytes(),
                    &format!("{prefix}/chunks/chunks.json"),
                    ARTIFACTS_CONTAINER,
                )
                .await
                .expect("put chunks");
            let artifacts = ArtifactPaths {
                jsonl: None,
                faiss_index: Some(faiss),
                chunks: Some(chunks_path),
            };
            let document = if aggregated {
                Document::aggregated(job_id, artifacts)
            } else {
                Document::for_file(job_id, "original.txt".into(), "text/plain".into(), artifacts)
            };
            self.db
                .store_item(document.clone())
                .await
                .expect("store document");
            document
        }
    }
}
