use async_trait::async_trait;
use atheneum_core::error::{AtheneumError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend is not initialized")]
    NotReady,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("hybrid query is not supported by this backend")]
    HybridUnsupported,
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend state is corrupt: {0}")]
    Corrupt(String),
}

impl AtheneumError for BackendError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            BackendError::NotReady => ErrorKind::NotReady,
            BackendError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BackendError::Unavailable(_) | BackendError::Io(_) => ErrorKind::BackendUnavailable,
            BackendError::HybridUnsupported => ErrorKind::InvalidArgument,
            BackendError::Corrupt(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Conjunctive equality filter over record metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: HashMap<String, String>,
}

impl MetadataFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            equals: HashMap::from([(key.into(), value.into())]),
        }
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub backend: String,
    pub collection: String,
    pub total_documents: usize,
    pub embedding_dimension: usize,
    pub storage_size_bytes: u64,
    pub index_type: String,
}

/// Storage boundary for one project collection. Implementations handle their
/// own synchronization; callers may share a handle across tasks freely.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Idempotent; must be called before any query or write.
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Upsert: an existing id is replaced wholesale. All slices must have
    /// equal length.
    async fn add_documents(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[HashMap<String, String>],
    ) -> Result<(), BackendError>;

    /// Dense retrieval, sorted by descending similarity in [0, 1].
    async fn query_vector(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, BackendError>;

    /// Keyword retrieval; scores live in a backend-defined non-negative space.
    async fn query_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, BackendError>;

    /// Optional native fusion. Backends without one return
    /// [`BackendError::HybridUnsupported`] and the retrieval engine runs its
    /// own rank fusion instead.
    async fn query_hybrid(
        &self,
        _query: &[f32],
        _query_text: &str,
        _top_k: usize,
        _alpha: f32,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, BackendError> {
        Err(BackendError::HybridUnsupported)
    }

    /// Embeddings for the given ids; unknown ids are silently absent.
    async fn fetch_vectors(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>, BackendError>;

    /// Deletes by ids, filter, or both. Omitting both is an error.
    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filter: Option<&MetadataFilter>,
    ) -> Result<usize, BackendError>;

    async fn get_statistics(&self) -> Result<BackendStats, BackendError>;

    async fn get_health(&self) -> BackendHealth;

    async fn close(&self) -> Result<(), BackendError>;
}

/// Opens and drops per-project collections; the project manager owns one.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn open_collection(
        &self,
        collection_name: &str,
        dimension: usize,
    ) -> Result<Arc<dyn VectorBackend>, BackendError>;

    async fn drop_collection(&self, collection_name: &str) -> Result<(), BackendError>;
}
