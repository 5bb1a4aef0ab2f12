use bytes::Bytes;

/// One file of an upload batch, as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// File name reduced to a single safe path segment.
    pub fn storage_name(&self) -> String {
        sanitize_segment(&self.file_name, "file")
    }
}

/// Keeps ASCII alphanumerics plus `.`, `-` and `_`; everything else becomes `_`.
///
/// Only the last path component is kept, and an empty result is replaced by `fallback`.
pub fn sanitize_segment(raw: &str, fallback: &str) -> String {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = last
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_components_are_dropped() {
        assert_eq!(sanitize_segment("../../etc/passwd", "file"), "passwd");
        assert_eq!(sanitize_segment("C:\\docs\\report.pdf", "file"), "report.pdf");
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(sanitize_segment("my report (v2).docx", "file"), "my_report__v2_.docx");
        assert_eq!(sanitize_segment("..", "file"), "file");
        assert_eq!(sanitize_segment("", "job"), "job");
    }
}
