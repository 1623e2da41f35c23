use async_trait::async_trait;
use atheneum_core::error::{AtheneumError, ErrorKind};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Markdown,
    Json,
    Unsupported,
}

pub fn detect_content_kind(content_type: &str, filename: Option<&str>) -> ContentKind {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "text/plain" => ContentKind::Text,
        "text/markdown" => ContentKind::Markdown,
        "application/json" => ContentKind::Json,
        _ => {
            if let Some(name) = filename {
                match file_extension(name).as_str() {
                    "txt" => ContentKind::Text,
                    "md" | "markdown" => ContentKind::Markdown,
                    "json" => ContentKind::Json,
                    _ => ContentKind::Unsupported,
                }
            } else {
                ContentKind::Unsupported
            }
        }
    }
}

pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("content is not valid UTF-8")]
    InvalidUtf8,
    #[error("extraction failed: {0}")]
    Failed(String),
}

impl AtheneumError for ExtractError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ExtractError::UnsupportedType(_) => ErrorKind::InvalidArgument,
            ExtractError::InvalidUtf8 => ErrorKind::InvalidArgument,
            ExtractError::Failed(_) => ErrorKind::BackendUnavailable,
        }
    }
}

/// Boundary to the document-format world. Rich formats (PDF, DOCX, HTML)
/// live behind implementations of this trait; the core only ever sees the
/// plain text that comes back.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: Option<&str>,
    ) -> Result<String, ExtractError>;
}

/// Built-in extractor for UTF-8 text formats only.
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: Option<&str>,
    ) -> Result<String, ExtractError> {
        match detect_content_kind(content_type, filename) {
            ContentKind::Text | ContentKind::Markdown | ContentKind::Json => {
                String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidUtf8)
            }
            ContentKind::Unsupported => {
                Err(ExtractError::UnsupportedType(content_type.to_string()))
            }
        }
    }
}
