use std::{fmt, str::FromStr};

use common::{
    error::AppError,
    storage::types::{document::Document, finetuned_model::FineTunedModel},
    utils::llm::{ChatMessage, ChatOptions},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    context::{load_document_context, load_job_context, RetrievalContext},
    vector_index::{query, MAX_NEIGHBOURS},
    RetrievalService,
};

/// How a chat question is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Retrieved context answered by the default chat model.
    #[default]
    Rag,
    /// Retrieved context answered by the job's fine-tuned model.
    Raft,
    /// The fine-tuned model answers the bare question.
    FineTunedOnly,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rag => "rag",
            Self::Raft => "raft",
            Self::FineTunedOnly => "fine_tuned_only",
        })
    }
}

impl FromStr for ChatMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rag" => Ok(Self::Rag),
            "raft" => Ok(Self::Raft),
            "fine_tuned_only" => Ok(Self::FineTunedOnly),
            other => Err(AppError::Validation(format!("Unknown chat mode: {other}"))),
        }
    }
}

pub fn build_rag_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context, answer the question:\n\nContext:\n{context}\n\nQuestion: {question}"
    )
}

impl RetrievalService {
    #[instrument(skip_all, fields(job_id = %job_id, mode = %mode))]
    pub async fn chat_by_job(
        &self,
        job_id: &str,
        message: &str,
        mode: ChatMode,
    ) -> Result<String, AppError> {
        if mode == ChatMode::FineTunedOnly {
            let model = self.fine_tuned_model(job_id).await?;
            return self
                .llm
                .chat(&model, vec![ChatMessage::user(message)], ChatOptions::default())
                .await;
        }

        let context = load_job_context(&self.db, &self.storage, job_id).await?;
        let model = match mode {
            ChatMode::Raft => self.fine_tuned_model(job_id).await?,
            _ => self.chat_model.clone(),
        };
        self.answer_from_context(&context, message, &model).await
    }

    /// RAG answer restricted to one uploaded file's own index.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn chat_by_document(
        &self,
        document_id: &str,
        message: &str,
    ) -> Result<String, AppError> {
        let document = Document::get(document_id, &self.db).await?;
        let context = load_document_context(&self.storage, &document)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("RAG index or chunks not found for this document".into())
            })?;
        self.answer_from_context(&context, message, &self.chat_model)
            .await
    }

    async fn answer_from_context(
        &self,
        context: &RetrievalContext,
        message: &str,
        model: &str,
    ) -> Result<String, AppError> {
        let retrieved = query(
            &self.embedding,
            &context.index,
            &context.chunks,
            message,
            MAX_NEIGHBOURS,
        )
        .await?;
        if retrieved.is_empty() {
            return Err(AppError::NoRelevantContext(
                "No relevant context found for your query".into(),
            ));
        }
        debug!(retrieved = retrieved.len(), model, "answering with retrieved context");

        let prompt = build_rag_prompt(&retrieved.join("\n"), message);
        self.llm
            .chat(model, vec![ChatMessage::user(prompt)], ChatOptions::default())
            .await
    }

    async fn fine_tuned_model(&self, job_id: &str) -> Result<String, AppError> {
        FineTunedModel::ready_model_for_job(job_id, &self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Fine-tuned model not available for this job".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use common::storage::types::document::ArtifactPaths;

    #[test]
    fn modes_parse_from_wire_names() {
        assert_eq!("rag".parse::<ChatMode>().expect("rag"), ChatMode::Rag);
        assert_eq!(
            "fine_tuned_only".parse::<ChatMode>().expect("ft"),
            ChatMode::FineTunedOnly
        );
        assert!("graph".parse::<ChatMode>().is_err());
        assert_eq!(ChatMode::default(), ChatMode::Rag);
        assert_eq!(ChatMode::Raft.to_string(), "raft");
    }

    #[tokio::test]
    async fn rag_prompt_carries_retrieved_context() {
        let harness = Harness::new("grounded answer").await;
        harness
            .document_with_chunks("job-1", &["apples are red", "bananas are yellow"], true)
            .await;

        let reply = harness
            .service
            .chat_by_job("job-1", "apples are red", ChatMode::Rag)
            .await
            .expect("chat");
        assert_eq!(reply, "grounded answer");

        let calls = harness.llm.calls.lock().await;
        assert_eq!(calls.len(), 1);
        let (model, messages, _) = &calls[0];
        assert_eq!(model, "test-chat-model");
        assert!(messages[0]
            .content
            .starts_with("Based on the following context, answer the question:\n\nContext:\napples are red"));
        assert!(messages[0].content.ends_with("Question: apples are red"));
    }

    #[tokio::test]
    async fn raft_requires_a_fine_tuned_model() {
        let harness = Harness::new("unused").await;
        harness
            .document_with_chunks("job-2", &["some context"], true)
            .await;

        let err = harness
            .service
            .chat_by_job("job-2", "question", ChatMode::Raft)
            .await
            .expect_err("no model");
        assert!(matches!(err, AppError::NotFound(ref m) if m.contains("Fine-tuned model")));
        assert!(harness.llm.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn raft_and_fine_tuned_only_use_latest_model() {
        let harness = Harness::new("tuned").await;
        harness
            .document_with_chunks("job-3", &["context chunk"], true)
            .await;
        let mut attempt = FineTunedModel::new("job-3", "ftjob-1".into());
        attempt.openai_model_id = Some("ft:model-1".into());
        harness.db.store_item(attempt).await.expect("store model");

        harness
            .service
            .chat_by_job("job-3", "hi", ChatMode::Raft)
            .await
            .expect("raft");
        harness
            .service
            .chat_by_job("job-3", "hi", ChatMode::FineTunedOnly)
            .await
            .expect("fine tuned");

        let calls = harness.llm.calls.lock().await;
        assert_eq!(calls[0].0, "ft:model-1");
        assert_eq!(calls[1].0, "ft:model-1");
        assert_eq!(calls[1].1[0].content, "hi");
    }

    #[tokio::test]
    async fn job_without_chunks_reports_missing_context() {
        let harness = Harness::new("unused").await;
        harness
            .db
            .store_item(Document::aggregated("job-4", ArtifactPaths::default()))
            .await
            .expect("store");

        let err = harness
            .service
            .chat_by_job("job-4", "anything", ChatMode::Rag)
            .await
            .expect_err("no context");
        assert!(matches!(err, AppError::NoRelevantContext(_)));
    }

    #[tokio::test]
    async fn document_chat_uses_the_file_index() {
        let harness = Harness::new("per file").await;
        let document = harness
            .document_with_chunks("job-5", &["only this file"], false)
            .await;

        let reply = harness
            .service
            .chat_by_document(&document.id, "what file?")
            .await
            .expect("chat");
        assert_eq!(reply, "per file");

        let bare = Document::for_file("job-5", "x".into(), "text/plain".into(), ArtifactPaths::default());
        harness.db.store_item(bare.clone()).await.expect("store");
        let err = harness
            .service
            .chat_by_document(&bare.id, "what file?")
            .await
            .expect_err("no index");
        assert!(err.is_not_available());
    }
}
