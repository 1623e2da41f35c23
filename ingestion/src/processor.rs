use atheneum_core::embedding::{EmbedError, Embedder};
use atheneum_core::error::{AtheneumError, ErrorKind};
use atheneum_core::metrics::MetricsRegistry;
use atheneum_core::model::Document;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::backend::{BackendError, MetadataFilter, VectorBackend};
use storage::repo::{DocumentRepository, RepoError};
use thiserror::Error;
use tracing::{info, warn};

use crate::chunkers::{
    AutoChunker, ChunkContext, ChunkError, Chunker, CodeChunker, CodeConfig, MarkdownChunker,
    MarkdownConfig, RecursiveChunker, RecursiveConfig, SemanticChunker, SemanticConfig,
};
use crate::embedding_cache::CachedEmbedder;
use crate::extract::{DocumentExtractor, ExtractError, PlainTextExtractor};
use crate::policy::{ContentPolicy, PassThroughPolicy, PolicyError};

pub const DEFAULT_INGEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document content must not be empty")]
    EmptyContent,
    #[error("chunking produced no chunks")]
    NoChunks,
    #[error("ingest deadline exceeded")]
    DeadlineExceeded,
    #[error("content policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("chunking: {0}")]
    Chunking(#[from] ChunkError),
    #[error("embedding: {0}")]
    Embedding(#[from] EmbedError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractError),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("repository: {0}")]
    Repository(#[from] RepoError),
}

impl AtheneumError for IngestError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            IngestError::EmptyContent | IngestError::NoChunks => ErrorKind::InvalidArgument,
            IngestError::DeadlineExceeded => ErrorKind::Canceled,
            IngestError::Policy(err) => err.error_kind(),
            IngestError::Chunking(err) => err.error_kind(),
            IngestError::Embedding(err) => err.error_kind(),
            IngestError::Extraction(err) => err.error_kind(),
            IngestError::Backend(err) => err.error_kind(),
            IngestError::Repository(err) => err.error_kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IngestPayload {
    Text {
        doc_id: String,
        content: String,
        source_path: Option<String>,
        metadata: HashMap<String, String>,
    },
    File {
        doc_id: String,
        filename: String,
        bytes: Vec<u8>,
        content_type: String,
        metadata: HashMap<String, String>,
    },
}

impl IngestPayload {
    pub fn text(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Text {
            doc_id: doc_id.into(),
            content: content.into(),
            source_path: None,
            metadata: HashMap::new(),
        }
    }

    pub fn doc_id(&self) -> &str {
        match self {
            IngestPayload::Text { doc_id, .. } => doc_id,
            IngestPayload::File { doc_id, .. } => doc_id,
        }
    }
}

/// Explicit strategy choice; `Auto` applies the content-descriptor dispatch.
#[derive(Debug, Clone, Default)]
pub enum StrategySelection {
    #[default]
    Auto,
    Recursive(RecursiveConfig),
    Markdown(MarkdownConfig),
    Code(CodeConfig),
    Semantic(SemanticConfig),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub strategy: StrategySelection,
    pub deadline: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            strategy: StrategySelection::Auto,
            deadline: DEFAULT_INGEST_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub doc_id: String,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug)]
pub struct IngestItemOutcome {
    pub doc_id: String,
    pub result: Result<IngestOutcome, IngestError>,
}

/// Ingest path for one project: extract -> policy -> chunk -> embed -> store.
pub struct IngestionPipeline {
    project_id: String,
    repo: Arc<DocumentRepository>,
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<CachedEmbedder>,
    extractor: Arc<dyn DocumentExtractor>,
    policy: Arc<dyn ContentPolicy>,
    auto: AutoChunker,
    metrics: Arc<MetricsRegistry>,
}

impl IngestionPipeline {
    pub fn new(
        project_id: impl Into<String>,
        repo: Arc<DocumentRepository>,
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<CachedEmbedder>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, ChunkError> {
        let auto = AutoChunker::new(embedder.clone() as Arc<dyn Embedder>)?;
        Ok(Self {
            project_id: project_id.into(),
            repo,
            backend,
            embedder,
            extractor: Arc::new(PlainTextExtractor),
            policy: Arc::new(PassThroughPolicy),
            auto,
            metrics,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ContentPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub async fn ingest_document(
        &self,
        payload: IngestPayload,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        let doc_id = payload.doc_id().to_string();
        let existed = self.repo.get_document(&doc_id).await.is_some();

        let result =
            match tokio::time::timeout(options.deadline, self.ingest_inner(payload, options)).await
            {
                Ok(result) => result,
                Err(_) => {
                    // Best-effort rollback of a partial first-time insert.
                    if !existed {
                        let filter = MetadataFilter::equals("parent_doc_id", doc_id.clone());
                        if let Err(err) = self.backend.delete_documents(None, Some(&filter)).await {
                            warn!(doc_id = %doc_id, error = %err, "cleanup after deadline failed");
                        }
                    }
                    Err(IngestError::DeadlineExceeded)
                }
            };

        match &result {
            Ok(outcome) => {
                self.metrics.record_ingest(&self.project_id, "ok");
                self.metrics
                    .set_documents_total(&self.project_id, self.repo.document_count().await as u64);
                info!(
                    doc_id = %outcome.doc_id,
                    chunks = outcome.chunk_ids.len(),
                    "document ingested"
                );
            }
            Err(err) => {
                self.metrics.record_ingest(&self.project_id, "error");
                self.metrics
                    .record_error(&self.project_id, &err.error_kind().to_string());
            }
        }
        result
    }

    /// Items fail independently; one bad document never aborts the batch.
    pub async fn ingest_batch(
        &self,
        payloads: Vec<IngestPayload>,
        options: &IngestOptions,
    ) -> Vec<IngestItemOutcome> {
        let mut outcomes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let doc_id = payload.doc_id().to_string();
            let result = self.ingest_document(payload, options).await;
            outcomes.push(IngestItemOutcome { doc_id, result });
        }
        outcomes
    }

    pub async fn delete_document(&self, doc_id: &str) -> Result<bool, IngestError> {
        let filter = MetadataFilter::equals("parent_doc_id", doc_id.to_string());
        self.backend.delete_documents(None, Some(&filter)).await?;
        let removed = self.repo.delete(doc_id).await?;
        self.metrics
            .set_documents_total(&self.project_id, self.repo.document_count().await as u64);
        Ok(removed)
    }

    async fn ingest_inner(
        &self,
        payload: IngestPayload,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        let (doc_id, raw_text, source_path, metadata) = match payload {
            IngestPayload::Text {
                doc_id,
                content,
                source_path,
                metadata,
            } => (doc_id, content, source_path, metadata),
            IngestPayload::File {
                doc_id,
                filename,
                bytes,
                content_type,
                mut metadata,
            } => {
                let text = self
                    .extractor
                    .extract(&bytes, &content_type, Some(&filename))
                    .await?;
                metadata.insert("filename".to_string(), filename.clone());
                metadata.insert("content_type".to_string(), content_type);
                (doc_id, text, Some(filename), metadata)
            }
        };

        if raw_text.trim().is_empty() {
            return Err(IngestError::EmptyContent);
        }
        let text = self.policy.apply(&raw_text)?;

        let mut ctx = ChunkContext::new(&doc_id);
        if let Some(path) = &source_path {
            ctx = ctx.with_source_path(path.clone());
        }

        let started = Instant::now();
        let chunks = match &options.strategy {
            StrategySelection::Auto => self.auto.chunk(&text, &ctx).await?,
            StrategySelection::Recursive(config) => {
                RecursiveChunker::new(*config)?.chunk(&text, &ctx).await?
            }
            StrategySelection::Markdown(config) => {
                MarkdownChunker::new(*config)?.chunk(&text, &ctx).await?
            }
            StrategySelection::Code(config) => {
                CodeChunker::new(*config)?.chunk(&text, &ctx).await?
            }
            StrategySelection::Semantic(config) => {
                SemanticChunker::new(*config, self.embedder.clone() as Arc<dyn Embedder>)?
                    .chunk(&text, &ctx)
                    .await?
            }
        };
        if chunks.is_empty() {
            return Err(IngestError::NoChunks);
        }

        let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.text.len()).collect();
        self.metrics.record_chunking(
            &chunks[0].metadata.chunking_strategy,
            started.elapsed().as_secs_f64(),
            &sizes,
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let ids: Vec<String> = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        let metadatas: Vec<HashMap<String, String>> = chunks
            .iter()
            .map(|chunk| chunk.metadata.to_map())
            .collect();

        // Replacing a document drops its previous chunks first, so a shrink
        // cannot leave stale trailing chunks behind.
        if self.repo.get_document(&doc_id).await.is_some() {
            let filter = MetadataFilter::equals("parent_doc_id", doc_id.clone());
            self.backend.delete_documents(None, Some(&filter)).await?;
        }

        self.backend
            .add_documents(&ids, &embeddings, &texts, &metadatas)
            .await?;

        let mut document = Document::new(&doc_id, text).with_metadata(metadata);
        if let Some(path) = source_path {
            document = document.with_source_path(path);
        }
        self.repo.add_document(document).await?;

        Ok(IngestOutcome {
            doc_id,
            chunk_ids: ids,
        })
    }
}
