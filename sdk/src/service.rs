use async_trait::async_trait;
use atheneum_core::config::AppConfig;
use atheneum_core::embedding::{EmbedError, Embedder, EmbedderProvider};
use atheneum_core::error::{AtheneumError, ErrorKind, ErrorResponse};
use atheneum_core::metrics::MetricsRegistry;
use atheneum_core::model::{Project, ProjectPatch};
use dashmap::DashMap;
use ingestion::chunkers::ChunkError;
use ingestion::embedding_cache::CachedEmbedder;
use ingestion::processor::{IngestError, IngestOptions, IngestPayload, IngestionPipeline};
use query::engine::{EngineError, MmrMode, RetrievalEngine};
use query::expander::{ExpansionConfig, QueryExpander, QueryExpansion, SynonymLexicon};
use query::options::{OptionsError, SearchMode, SearchOptions};
use query::semantic_cache::{SemanticCache, SemanticCacheConfig, SemanticCacheKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use storage::backend::{SearchHit, VectorBackend};
use storage::repo::DocumentRepository;
use tenancy::apikey::{ApiKey, GeneratedKey, Scope};
use tenancy::heartbeat::ProjectWarmer;
use tenancy::manager::{ManagerError, ProjectManager};
use tenancy::rate_limit::{RateLimitExceeded, RateLimiter};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("query deadline exceeded")]
    DeadlineExceeded,
    #[error("mmr applies to vector or hybrid mode only")]
    MmrWithKeywordMode,
    #[error("{0}")]
    Options(#[from] OptionsError),
    #[error("{0}")]
    Manager(#[from] ManagerError),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Ingest(#[from] IngestError),
    #[error("{0}")]
    Embed(#[from] EmbedError),
    #[error("{0}")]
    Chunk(#[from] ChunkError),
    #[error("{0}")]
    RateLimited(#[from] RateLimitExceeded),
}

impl AtheneumError for ServiceError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ServiceError::DeadlineExceeded => ErrorKind::Canceled,
            ServiceError::MmrWithKeywordMode => ErrorKind::InvalidArgument,
            ServiceError::Options(_) => ErrorKind::InvalidArgument,
            ServiceError::Manager(err) => err.error_kind(),
            ServiceError::Engine(err) => err.error_kind(),
            ServiceError::Ingest(err) => err.error_kind(),
            ServiceError::Embed(err) => err.error_kind(),
            ServiceError::Chunk(err) => err.error_kind(),
            ServiceError::RateLimited(err) => err.error_kind(),
        }
    }
}

impl ServiceError {
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::from_error(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<QueryExpansion>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_similarity: Option<f32>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestItemReport {
    pub doc_id: String,
    pub status: String,
    #[serde(default)]
    pub chunk_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

struct ProjectRuntime {
    backend: Arc<dyn VectorBackend>,
    repo: Arc<DocumentRepository>,
    embedder: Arc<CachedEmbedder>,
    engine: RetrievalEngine,
    pipeline: IngestionPipeline,
    semantic_cache: Mutex<SemanticCache<Vec<SearchHit>>>,
}

/// In-process service surface consumed by the HTTP layer: project and key
/// CRUD, query, ingest, metrics dump. Holds one lazily-built runtime per
/// project and routes every call through its project's isolated resources.
pub struct KnowledgeService {
    manager: Arc<ProjectManager>,
    embedders: Arc<dyn EmbedderProvider>,
    metrics: Arc<MetricsRegistry>,
    expander: QueryExpander,
    rate_limiter: RateLimiter,
    semantic_cache_config: SemanticCacheConfig,
    embedding_cache_capacity: usize,
    data_dir: Option<PathBuf>,
    runtimes: DashMap<Uuid, Arc<ProjectRuntime>>,
}

impl KnowledgeService {
    pub fn new(
        manager: Arc<ProjectManager>,
        embedders: Arc<dyn EmbedderProvider>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let config = AppConfig::default();
        Self::with_config(manager, embedders, metrics, &config)
    }

    pub fn with_config(
        manager: Arc<ProjectManager>,
        embedders: Arc<dyn EmbedderProvider>,
        metrics: Arc<MetricsRegistry>,
        config: &AppConfig,
    ) -> Self {
        let rate_limiter = RateLimiter::with_default_limits()
            .with_limit("create", config.rate_limit.create_per_minute)
            .with_limit("list", config.rate_limit.list_per_minute)
            .with_limit("query", config.rate_limit.query_per_minute)
            .with_limit("ingest", config.rate_limit.ingest_per_minute);

        Self {
            manager,
            embedders,
            metrics,
            expander: QueryExpander::new(ExpansionConfig::default()),
            rate_limiter,
            semantic_cache_config: SemanticCacheConfig {
                max_entries: config.semantic_cache.max_entries,
                similarity_threshold: config.semantic_cache.similarity_threshold,
                ttl_seconds: Some(config.semantic_cache.ttl_seconds),
                ..SemanticCacheConfig::default()
            },
            embedding_cache_capacity: config.cache.embedding_capacity,
            data_dir: Some(PathBuf::from(&config.storage.data_dir)),
            runtimes: DashMap::new(),
        }
    }

    pub fn with_lexicon(mut self, lexicon: Arc<dyn SynonymLexicon>) -> Self {
        self.expander = QueryExpander::new(ExpansionConfig::default()).with_lexicon(lexicon);
        self
    }

    pub fn without_document_cache_files(mut self) -> Self {
        self.data_dir = None;
        self
    }

    pub fn manager(&self) -> &Arc<ProjectManager> {
        &self.manager
    }

    // ---- project CRUD -----------------------------------------------------

    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        embedding_model: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<Project, ServiceError> {
        self.rate_limiter.allow("create", "global")?;
        Ok(self
            .manager
            .create_project(name, description, embedding_model, metadata)
            .await?)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project, ServiceError> {
        self.manager
            .get_project(id)
            .await
            .ok_or(ServiceError::Manager(ManagerError::NotFound(id)))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, ServiceError> {
        self.rate_limiter.allow("list", "global")?;
        Ok(self.manager.list_projects().await)
    }

    pub async fn update_project(
        &self,
        id: Uuid,
        patch: ProjectPatch,
    ) -> Result<Project, ServiceError> {
        let project = self.manager.update_project(id, patch).await?;
        // The runtime may hold a replaced backend handle; rebuild lazily.
        self.runtimes.remove(&id);
        Ok(project)
    }

    pub async fn delete_project(&self, id: Uuid) -> Result<(), ServiceError> {
        self.manager.delete_project(id).await?;
        self.runtimes.remove(&id);
        self.rate_limiter.forget_subject(&id.to_string());
        Ok(())
    }

    // ---- API keys ---------------------------------------------------------

    pub async fn create_api_key(
        &self,
        project_id: Uuid,
        name: &str,
        scopes: BTreeSet<Scope>,
        expires_days: Option<i64>,
    ) -> Result<GeneratedKey, ServiceError> {
        self.rate_limiter.allow("create", "global")?;
        Ok(self
            .manager
            .create_api_key(project_id, name, scopes, expires_days)
            .await?)
    }

    pub async fn list_api_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        self.rate_limiter.allow("list", "global")?;
        Ok(self.manager.list_api_keys(project_id).await?)
    }

    pub async fn revoke_api_key(
        &self,
        project_id: Uuid,
        key_id: &str,
    ) -> Result<(), ServiceError> {
        Ok(self.manager.revoke_api_key(project_id, key_id).await?)
    }

    pub async fn validate_api_key(
        &self,
        raw: &str,
        required: Scope,
    ) -> Result<(Uuid, String), ServiceError> {
        Ok(self.manager.validate_api_key(raw, required).await?)
    }

    // ---- query ------------------------------------------------------------

    pub async fn query(
        &self,
        project_id: Uuid,
        text: &str,
        options: &SearchOptions,
    ) -> Result<QueryResponse, ServiceError> {
        self.rate_limiter.allow("query", &project_id.to_string())?;
        options.validate()?;
        if options.use_mmr && options.mode == SearchMode::Keyword {
            return Err(ServiceError::MmrWithKeywordMode);
        }

        let started = Instant::now();
        let result = tokio::time::timeout(
            options.deadline,
            self.query_inner(project_id, text, options, started),
        )
        .await
        .unwrap_or(Err(ServiceError::DeadlineExceeded));

        let project_label = project_id.to_string();
        match &result {
            Ok(_) => {
                self.metrics
                    .record_query(&project_label, "ok", started.elapsed().as_secs_f64());
            }
            Err(err) => {
                self.metrics
                    .record_query(&project_label, "error", started.elapsed().as_secs_f64());
                self.metrics
                    .record_error(&project_label, &err.error_kind().to_string());
            }
        }
        result
    }

    async fn query_inner(
        &self,
        project_id: Uuid,
        text: &str,
        options: &SearchOptions,
        started: Instant,
    ) -> Result<QueryResponse, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::Engine(EngineError::EmptyQuery));
        }
        let runtime = self.runtime(project_id).await?;
        let project_label = project_id.to_string();

        let expansion = if options.expand_query {
            let expand_started = Instant::now();
            let expansion = self.expander.expand(text);
            self.metrics
                .record_query_expansion(expand_started.elapsed().as_secs_f64());
            Some(expansion)
        } else {
            None
        };
        let effective_text = expansion
            .as_ref()
            .map(|expansion| expansion.expanded_query.clone())
            .unwrap_or_else(|| text.trim().to_string());

        // Exact-text layer first: the project's LRU result cache. The key
        // carries every option that changes ranking, so the same text issued
        // at a different alpha, lambda or filter never collides.
        let lru_key = format!(
            "{:?}|{}|{}|{}|{}|{}|{}",
            options.mode,
            options.top_k,
            options.use_mmr,
            options.alpha,
            options.mmr_lambda,
            filter_fingerprint(options.filter.as_ref()),
            effective_text
        );
        let cache_key = SemanticCacheKey::from_options(options);
        let project_cache = self.manager.get_project_cache(project_id).await?;
        if options.use_cache {
            if let Some(results) = project_cache.get(&lru_key) {
                self.metrics.record_cache_lookup(&project_label, true);
                return Ok(QueryResponse {
                    results,
                    expansion,
                    cache_hit: true,
                    cache_similarity: Some(1.0),
                    latency_ms: started.elapsed().as_millis() as u64,
                });
            }
            self.metrics.record_cache_lookup(&project_label, false);
        }

        let embedding = runtime.embedder.embed(&effective_text).await?;

        if options.use_cache {
            let hit = {
                let mut cache = runtime.semantic_cache.lock().unwrap();
                cache.get(&cache_key, &effective_text, &embedding)
            };
            match hit {
                Some(hit) => {
                    self.metrics.record_semantic_cache(true, Some(hit.similarity));
                    return Ok(QueryResponse {
                        results: hit.value,
                        expansion,
                        cache_hit: true,
                        cache_similarity: Some(hit.similarity),
                        latency_ms: started.elapsed().as_millis() as u64,
                    });
                }
                None => self.metrics.record_semantic_cache(false, None),
            }
        }

        let filter = options.filter.as_ref();
        let results = if options.use_mmr {
            let mode = match options.mode {
                SearchMode::Vector => MmrMode::Vector,
                SearchMode::Hybrid => MmrMode::Hybrid {
                    query_text: effective_text.clone(),
                    alpha: options.alpha,
                },
                SearchMode::Keyword => return Err(ServiceError::MmrWithKeywordMode),
            };
            runtime
                .engine
                .search_with_mmr(&embedding, options.mmr_lambda, options.top_k, mode)
                .await?
        } else {
            match options.mode {
                SearchMode::Vector => {
                    runtime
                        .engine
                        .search_vector(&embedding, options.top_k, filter)
                        .await?
                }
                SearchMode::Keyword => {
                    runtime
                        .engine
                        .search_keyword(&effective_text, options.top_k, filter)
                        .await?
                }
                SearchMode::Hybrid => {
                    runtime
                        .engine
                        .search_hybrid(
                            &embedding,
                            &effective_text,
                            options.top_k,
                            options.alpha,
                            filter,
                        )
                        .await?
                }
            }
        };

        if options.use_cache {
            project_cache.put(lru_key, results.clone());
            let mut cache = runtime.semantic_cache.lock().unwrap();
            cache.put(cache_key, &effective_text, embedding, results.clone());
        }

        Ok(QueryResponse {
            results,
            expansion,
            cache_hit: false,
            cache_similarity: None,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ---- ingest -----------------------------------------------------------

    pub async fn ingest(
        &self,
        project_id: Uuid,
        payloads: Vec<IngestPayload>,
        options: &IngestOptions,
    ) -> Result<Vec<IngestItemReport>, ServiceError> {
        self.rate_limiter.allow("ingest", &project_id.to_string())?;
        let runtime = self.runtime(project_id).await?;

        let outcomes = runtime.pipeline.ingest_batch(payloads, options).await;

        // Result caches go stale on write; clearing is best-effort and a
        // stale entry may still serve until its TTL.
        if outcomes.iter().any(|outcome| outcome.result.is_ok()) {
            if let Ok(cache) = self.manager.get_project_cache(project_id).await {
                cache.clear();
            }
            runtime.semantic_cache.lock().unwrap().clear();
        }

        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(success) => IngestItemReport {
                    doc_id: success.doc_id,
                    status: "ok".to_string(),
                    chunk_ids: success.chunk_ids,
                    error: None,
                },
                Err(err) => IngestItemReport {
                    doc_id: outcome.doc_id,
                    status: "error".to_string(),
                    chunk_ids: Vec::new(),
                    error: Some(ErrorResponse::from_error(&err)),
                },
            })
            .collect())
    }

    pub async fn delete_document(
        &self,
        project_id: Uuid,
        doc_id: &str,
    ) -> Result<bool, ServiceError> {
        let runtime = self.runtime(project_id).await?;
        let removed = runtime.pipeline.delete_document(doc_id).await?;
        if let Ok(cache) = self.manager.get_project_cache(project_id).await {
            cache.clear();
        }
        runtime.semantic_cache.lock().unwrap().clear();
        Ok(removed)
    }

    // ---- operational surface ----------------------------------------------

    pub fn metrics_text(&self) -> String {
        self.metrics.render_text()
    }

    /// Replays warming queries so heartbeat keeps hot projects' caches full.
    /// Runs below the rate limiter; background warming never consumes caller
    /// budget.
    pub async fn warm_project(&self, project_id: Uuid, queries: &[String]) {
        let options = SearchOptions::default();
        for query in queries {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                options.deadline,
                self.query_inner(project_id, query, &options, started),
            )
            .await;
            match outcome {
                Ok(Err(err)) => {
                    warn!(project_id = %project_id, error = %err, "warming query failed")
                }
                Err(_) => warn!(project_id = %project_id, "warming query timed out"),
                Ok(Ok(_)) => {}
            }
        }
    }

    pub async fn get_document(
        &self,
        project_id: Uuid,
        doc_id: &str,
    ) -> Result<Option<atheneum_core::model::Document>, ServiceError> {
        let runtime = self.runtime(project_id).await?;
        Ok(runtime.repo.get_document(doc_id).await)
    }

    pub async fn list_documents(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<atheneum_core::model::Document>, ServiceError> {
        self.rate_limiter.allow("list", "global")?;
        let runtime = self.runtime(project_id).await?;
        Ok(runtime.repo.list_documents().await)
    }

    pub async fn project_stats(
        &self,
        project_id: Uuid,
    ) -> Result<storage::backend::BackendStats, ServiceError> {
        let runtime = self.runtime(project_id).await?;
        Ok(runtime
            .backend
            .get_statistics()
            .await
            .map_err(ManagerError::Backend)?)
    }

    async fn runtime(&self, project_id: Uuid) -> Result<Arc<ProjectRuntime>, ServiceError> {
        if let Some(runtime) = self.runtimes.get(&project_id) {
            return Ok(runtime.clone());
        }

        let project = self.get_project(project_id).await?;
        let backend = self.manager.get_backend(project_id).await?;

        let repo = match &self.data_dir {
            Some(dir) => {
                let repo = DocumentRepository::with_cache_path(
                    dir.join(format!("{}_docs.json", project.collection_name)),
                );
                if let Err(err) = repo.load().await {
                    warn!(project_id = %project_id, error = %err, "document cache not restored");
                }
                Arc::new(repo)
            }
            None => Arc::new(DocumentRepository::new()),
        };

        let embedder = Arc::new(CachedEmbedder::new(
            self.embedders.embedder_for(&project.embedding_model),
            self.embedding_cache_capacity,
        ));
        let engine = RetrievalEngine::new(backend.clone());
        let pipeline = IngestionPipeline::new(
            project_id.to_string(),
            repo.clone(),
            backend.clone(),
            embedder.clone(),
            self.metrics.clone(),
        )?;

        let runtime = Arc::new(ProjectRuntime {
            backend: backend.clone(),
            repo,
            embedder,
            engine,
            pipeline,
            semantic_cache: Mutex::new(SemanticCache::with_config(
                self.semantic_cache_config.clone(),
            )),
        });
        self.runtimes.insert(project_id, runtime.clone());
        info!(project_id = %project_id, "project runtime built");
        Ok(runtime)
    }
}

/// Canonical text form of a metadata filter: sorted `key=value` pairs, so
/// two equal filters always fingerprint identically.
fn filter_fingerprint(filter: Option<&storage::backend::MetadataFilter>) -> String {
    match filter {
        None => String::new(),
        Some(filter) => {
            let mut pairs: Vec<String> = filter
                .equals
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            pairs.sort();
            pairs.join(",")
        }
    }
}

/// Adapter wiring the service into the heartbeat worker.
pub struct ServiceWarmer {
    service: Arc<KnowledgeService>,
}

impl ServiceWarmer {
    pub fn new(service: Arc<KnowledgeService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ProjectWarmer for ServiceWarmer {
    async fn warm(&self, project_id: Uuid, queries: &[String]) {
        self.service.warm_project(project_id, queries).await;
    }
}
