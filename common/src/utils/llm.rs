use std::{path::Path, sync::Arc};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs, CreateFileRequestArgs,
        CreateFineTuningJobRequestArgs, FilePurpose,
    },
    Client,
};
use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

/// One turn of a chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Sampling settings for a single completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FineTuneStatus {
    pub status: String,
    pub fine_tuned_model: Option<String>,
}

/// Chat and fine-tuning provider, injected wherever a model is called.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String, AppError>;

    /// Uploads a JSONL training file and returns the provider's file handle.
    async fn upload_training_file(&self, path: &Path) -> Result<String, AppError>;

    async fn submit_fine_tune(&self, file_id: &str, base_model: &str) -> Result<String, AppError>;

    async fn fine_tune_status(&self, external_job_id: &str) -> Result<FineTuneStatus, AppError>;
}

pub struct OpenAiProvider {
    client: Arc<Client<OpenAIConfig>>,
}

impl OpenAiProvider {
    pub fn new(client: Arc<Client<OpenAIConfig>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String, AppError> {
        let messages: Vec<ChatCompletionRequestMessage> = messages
            .into_iter()
            .map(|message| match message.role {
                ChatRole::System => {
                    ChatCompletionRequestSystemMessage::from(message.content).into()
                }
                ChatRole::User => ChatCompletionRequestUserMessage::from(message.content).into(),
            })
            .collect();

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages);
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        let request = args.build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
    }

    async fn upload_training_file(&self, path: &Path) -> Result<String, AppError> {
        let request = CreateFileRequestArgs::default()
            .file(path)
            .purpose(FilePurpose::FineTune)
            .build()?;
        let file = self.client.files().create(request).await?;
        Ok(file.id)
    }

    async fn submit_fine_tune(&self, file_id: &str, base_model: &str) -> Result<String, AppError> {
        let request = CreateFineTuningJobRequestArgs::default()
            .training_file(file_id)
            .model(base_model)
            .build()?;
        let job = self.client.fine_tuning().create(request).await?;
        Ok(job.id)
    }

    async fn fine_tune_status(&self, external_job_id: &str) -> Result<FineTuneStatus, AppError> {
        let job = self.client.fine_tuning().retrieve(external_job_id).await?;
        let status = match serde_json::to_value(&job.status)? {
            serde_json::Value::String(status) => status,
            other => other.to_string(),
        };
        Ok(FineTuneStatus {
            status,
            fine_tuned_model: job.fine_tuned_model,
        })
    }
}
