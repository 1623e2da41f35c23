use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    DuplicateName,
    Unauthorized,
    RateLimited,
    NotReady,
    BackendUnavailable,
    Conflict,
    Canceled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DuplicateName => "DUPLICATE_NAME",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Canceled => "CANCELED",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

pub trait AtheneumError: std::error::Error {
    fn error_kind(&self) -> ErrorKind;
}

/// Wire shape handed to the consumer-facing boundary. HTTP status mapping
/// happens outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind: kind.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Internal failures are logged server-side; the caller only sees the kind.
    pub fn from_error<E: AtheneumError + ?Sized>(err: &E) -> Self {
        let kind = err.error_kind();
        let message = match kind {
            ErrorKind::Internal => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self::new(kind, message)
    }
}
