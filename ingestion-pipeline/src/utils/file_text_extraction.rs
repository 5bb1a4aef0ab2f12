use std::path::Path;

use common::error::AppError;
use lopdf::Document as PdfDocument;
use tracing::debug;

use super::office_xml;

/// Declared media types the parser can turn into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Docx,
    Pptx,
    PlainText,
    Xlsx,
    Csv,
}

impl MediaType {
    /// Maps a declared content type (parameters such as `; charset=` are ignored).
    pub fn from_declared(declared: &str) -> Result<Self, AppError> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Ok(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(Self::Docx)
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Ok(Self::Pptx)
            }
            "text/plain" => Ok(Self::PlainText),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Ok(Self::Xlsx),
            "text/csv" => Ok(Self::Csv),
            _ => Err(AppError::UnsupportedType(declared.to_string())),
        }
    }

    pub fn parser_name(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::PlainText => "text",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }

    /// Extracts readable text from the raw file bytes.
    pub fn extract(self, bytes: &[u8]) -> Result<String, AppError> {
        let parse_error = |message: String| AppError::Parse {
            parser: self.parser_name(),
            message,
        };

        match self {
            Self::Pdf => extract_pdf_text(bytes).map_err(parse_error),
            Self::Docx => office_xml::docx_text(bytes).map_err(parse_error),
            Self::Pptx => office_xml::pptx_text(bytes).map_err(parse_error),
            Self::Xlsx => office_xml::xlsx_csv(bytes).map_err(parse_error),
            Self::PlainText | Self::Csv => String::from_utf8(bytes.to_vec())
                .map_err(|err| parse_error(format!("file is not valid UTF-8: {err}"))),
        }
    }
}

/// Reads a local file and extracts its text according to its media type.
pub async fn extract_text_from_file(path: &Path, media_type: MediaType) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| AppError::Parse {
        parser: media_type.parser_name(),
        message: format!("failed to read {}: {err}", path.display()),
    })?;

    let text = tokio::task::spawn_blocking(move || media_type.extract(&bytes)).await??;
    debug!(
        parser = media_type.parser_name(),
        chars = text.chars().count(),
        "extracted document text"
    );
    Ok(text)
}

/// Concatenates per-page text. Pages without a text layer contribute nothing.
fn extract_pdf_text(bytes: &[u8]) -> Result<String, String> {
    let document =
        PdfDocument::load_mem(bytes).map_err(|err| format!("Failed to parse PDF: {err}"))?;
    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    let mut text = String::new();
    for page in page_numbers {
        match document.extract_text(&[page]) {
            Ok(page_text) => text.push_str(&page_text),
            Err(err) => debug!(page, error = %err, "pdf page has no extractable text"),
        }
    }
    Ok(text)
}
