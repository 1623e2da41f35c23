use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{AtheneumError, ErrorKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embedding model returned an invalid vector")]
    InvalidVector,
    #[error("embedding backend error: {0}")]
    Backend(String),
}

impl AtheneumError for EmbedError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            EmbedError::EmptyInput => ErrorKind::InvalidArgument,
            EmbedError::InvalidVector => ErrorKind::Internal,
            EmbedError::Backend(_) => ErrorKind::BackendUnavailable,
        }
    }
}

/// External embedding-model boundary. Implementations must return vectors of
/// `dimension()` length; callers normalize through [`l2_normalize`] so cosine
/// similarity reduces to a dot product.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Scales `vector` to unit length in place. Returns `false` when the vector
/// is empty, contains non-finite values, or has zero norm.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    true
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Resolves embedding-model names to embedder handles. One project's model
/// is fixed at creation, so its vector dimension is too.
pub trait EmbedderProvider: Send + Sync {
    fn embedder_for(&self, model_id: &str) -> std::sync::Arc<dyn Embedder>;

    fn dimension_of(&self, model_id: &str) -> usize {
        self.embedder_for(model_id).dimension()
    }
}

/// Provider handing out [`DeterministicEmbedder`]s of one fixed dimension.
pub struct DeterministicProvider {
    dims: usize,
}

impl DeterministicProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl EmbedderProvider for DeterministicProvider {
    fn embedder_for(&self, model_id: &str) -> std::sync::Arc<dyn Embedder> {
        std::sync::Arc::new(DeterministicEmbedder::new(model_id, self.dims))
    }
}

/// Offline embedder: hashed bag-of-tokens, unit-normalized. Deterministic for
/// a given `(model_id, text)` pair, so repeated calls are byte-identical.
pub struct DeterministicEmbedder {
    model_id: String,
    dims: usize,
}

impl DeterministicEmbedder {
    pub fn new(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dims: dims.max(1),
        }
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(crate::model::DEFAULT_EMBEDDING_MODEL_ID, 384)
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dims];
        let mut tokens = 0usize;
        for token in tokenize(text) {
            let mut hasher = Sha256::new();
            hasher.update(self.model_id.as_bytes());
            hasher.update(b"\0");
            hasher.update(token.as_bytes());
            let digest = hasher.finalize();
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            vector[bucket] += 1.0;
            tokens += 1;
        }

        if tokens == 0 {
            return Err(EmbedError::EmptyInput);
        }
        if !l2_normalize(&mut vector) {
            return Err(EmbedError::InvalidVector);
        }
        Ok(vector)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic_for_same_inputs() {
        let embedder = DeterministicEmbedder::new("m0", 64);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embedding_changes_when_model_changes() {
        let a = DeterministicEmbedder::new("m0", 64)
            .embed("hello world")
            .await
            .unwrap();
        let b = DeterministicEmbedder::new("m1", 64)
            .embed("hello world")
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embedding_is_unit_norm() {
        let vector = DeterministicEmbedder::new("m0", 64)
            .embed("one two three four")
            .await
            .unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let embedder = DeterministicEmbedder::new("m0", 64);
        assert_eq!(embedder.embed("   ").await, Err(EmbedError::EmptyInput));
    }

    #[test]
    fn normalize_rejects_zero_and_nan() {
        let mut zero = vec![0.0, 0.0];
        assert!(!l2_normalize(&mut zero));
        let mut nan = vec![f32::NAN, 1.0];
        assert!(!l2_normalize(&mut nan));
        let mut ok = vec![3.0, 4.0];
        assert!(l2_normalize(&mut ok));
        assert!((ok[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
