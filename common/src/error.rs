use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("No files uploaded")]
    EmptyUpload,
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("{parser} extraction failed: {message}")]
    Parse {
        parser: &'static str,
        message: String,
    },
    #[error("Failed to process file {file_name}: {source}")]
    FileProcessing {
        file_name: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("Aggregated JSONL artifact not found for job {0}")]
    AggregatedArtifactMissing(String),
    #[error("No relevant context: {0}")]
    NoRelevantContext(String),
    #[error("Empty argument: {0} must not be empty")]
    EmptyArgument(&'static str),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Wraps a per-file failure with the name of the file that caused it.
    pub fn for_file(file_name: impl Into<String>, source: AppError) -> Self {
        Self::FileProcessing {
            file_name: file_name.into(),
            source: Box::new(source),
        }
    }

    /// Conditions callers present as empty or negative results rather than failures.
    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NoRelevantContext(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::EmptyUpload
                | Self::UnsupportedType(_)
                | Self::EmptyArgument(_)
                | Self::AggregatedArtifactMissing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_processing_names_file_and_cause() {
        let err = AppError::for_file(
            "report.pdf",
            AppError::Parse {
                parser: "pdf",
                message: "broken xref".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Failed to process file report.pdf: pdf extraction failed: broken xref"
        );
    }

    #[test]
    fn classifies_not_available_conditions() {
        assert!(AppError::NoRelevantContext("job".into()).is_not_available());
        assert!(AppError::AggregatedArtifactMissing("1".into()).is_validation());
        assert!(!AppError::EmptyUpload.is_not_available());
        assert!(AppError::EmptyUpload.is_validation());
        assert!(AppError::UnsupportedType("image/png".into()).is_validation());
    }
}
