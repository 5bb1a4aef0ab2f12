use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use ingestion_pipeline::UploadedFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    pub job_name: String,
    #[form_data(limit = "unlimited")]
    #[form_data(default)]
    pub files: Vec<FieldData<Bytes>>,
}

/// Declared part type, or a guess from the file name when the client sent none.
fn declared_type(content_type: Option<&str>, file_name: &str) -> String {
    match content_type {
        Some(declared) if !declared.trim().is_empty() && declared != OCTET_STREAM => {
            declared.to_string()
        }
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

pub async fn upload_files(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let files: Vec<UploadedFile> = input
        .files
        .into_iter()
        .map(|field| {
            let file_name = field
                .metadata
                .file_name
                .clone()
                .unwrap_or_else(|| "upload".to_string());
            let content_type = declared_type(field.metadata.content_type.as_deref(), &file_name);
            UploadedFile::new(file_name, content_type, field.contents)
        })
        .collect();

    info!(
        job_name = %input.job_name,
        file_count = files.len(),
        total_bytes = files.iter().map(|f| f.bytes.len()).sum::<usize>(),
        "Received upload request"
    );

    let outcome = state.ingestion.upload(&input.job_name, files).await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_prefers_the_part_header() {
        assert_eq!(
            declared_type(Some("application/pdf"), "notes.txt"),
            "application/pdf"
        );
    }

    #[test]
    fn declared_type_falls_back_to_file_name() {
        assert_eq!(declared_type(None, "notes.txt"), "text/plain");
        assert_eq!(declared_type(Some(OCTET_STREAM), "deck.pdf"), "application/pdf");
        assert_eq!(declared_type(Some(""), "unknown.zzz"), OCTET_STREAM);
    }
}
