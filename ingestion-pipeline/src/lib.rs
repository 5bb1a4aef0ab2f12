#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod synthetic;
pub mod types;
pub mod utils;

pub use pipeline::{
    job_namespace, DefaultPipelineServices, IngestionConfig, IngestionPipeline, IngestionTuning,
    PipelineServices, UploadOutcome,
};
pub use synthetic::response_log_prefix;
pub use types::UploadedFile;
pub use utils::{chunking::chunk_text, file_text_extraction::MediaType};
