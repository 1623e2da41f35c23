use atheneum_core::error::{AtheneumError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("content rejected by policy: {0}")]
    Rejected(String),
}

impl AtheneumError for PolicyError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            PolicyError::Rejected(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Pre-chunking text transform. A rejection fails only the document being
/// ingested, never the surrounding batch.
pub trait ContentPolicy: Send + Sync {
    fn apply(&self, text: &str) -> Result<String, PolicyError>;
}

pub struct PassThroughPolicy;

impl ContentPolicy for PassThroughPolicy {
    fn apply(&self, text: &str) -> Result<String, PolicyError> {
        Ok(text.to_string())
    }
}

/// Rejects documents containing any configured term (case-insensitive).
pub struct ForbiddenTermPolicy {
    terms: Vec<String>,
}

impl ForbiddenTermPolicy {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|term| term.into().to_lowercase())
                .collect(),
        }
    }
}

impl ContentPolicy for ForbiddenTermPolicy {
    fn apply(&self, text: &str) -> Result<String, PolicyError> {
        let lowered = text.to_lowercase();
        for term in &self.terms {
            if lowered.contains(term) {
                return Err(PolicyError::Rejected(term.clone()));
            }
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_keeps_text() {
        assert_eq!(PassThroughPolicy.apply("anything").unwrap(), "anything");
    }

    #[test]
    fn forbidden_term_rejects_case_insensitively() {
        let policy = ForbiddenTermPolicy::new(["secret"]);
        assert!(policy.apply("This is SECRET data").is_err());
        assert!(policy.apply("This is public data").is_ok());
    }
}
