use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::LlmProvider},
};
use finetune_pipeline::{FinetunePipeline, SharedResources};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::RetrievalService;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub ingestion: Arc<IngestionPipeline>,
    pub retrieval: RetrievalService,
    pub finetune: FinetunePipeline,
}

impl ApiState {
    /// Wires the pipelines around shared handles and a single provider client.
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: &AppConfig,
        storage: StorageManager,
        llm: Arc<dyn LlmProvider>,
        embedding: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let ingestion = IngestionPipeline::new(
            Arc::clone(&db),
            Arc::clone(&llm),
            config,
            storage.clone(),
            Arc::clone(&embedding),
        )?;
        let retrieval = RetrievalService::new(
            Arc::clone(&db),
            storage.clone(),
            embedding,
            Arc::clone(&llm),
            config.chat_model.clone(),
        );
        let finetune = FinetunePipeline::new(
            Arc::clone(&db),
            storage.clone(),
            llm,
            Arc::new(SharedResources::new(Arc::clone(&db), storage.clone())),
            config.finetune_model.clone(),
        );

        Ok(Self {
            db,
            config: config.clone(),
            storage,
            ingestion: Arc::new(ingestion),
            retrieval,
            finetune,
        })
    }
}
