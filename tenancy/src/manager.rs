use atheneum_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use atheneum_core::cache::LruCache;
use atheneum_core::embedding::EmbedderProvider;
use atheneum_core::error::{AtheneumError, ErrorKind};
use atheneum_core::metrics::MetricsRegistry;
use atheneum_core::model::{Project, ProjectPatch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use storage::backend::{BackendError, BackendFactory, SearchHit, VectorBackend};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::apikey::{ApiKey, ApiKeyError, GeneratedKey, KeyRing, Scope};

const MANAGER_FILE_VERSION: u32 = 1;
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Per-project query-result cache handed out by the manager.
pub type ProjectCache = Arc<LruCache<String, Vec<SearchHit>>>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("project name already exists: {0}")]
    DuplicateName(String),
    #[error("project not found: {0}")]
    NotFound(Uuid),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("embedding model cannot change while the project has documents")]
    ModelChangeConflict,
    #[error("key: {0}")]
    Key(#[from] ApiKeyError),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("manager io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manager state file is invalid: {0}")]
    InvalidStateFile(String),
}

impl AtheneumError for ManagerError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ManagerError::DuplicateName(_) => ErrorKind::DuplicateName,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ManagerError::ModelChangeConflict => ErrorKind::Conflict,
            ManagerError::Key(err) => err.error_kind(),
            ManagerError::Backend(err) => err.error_kind(),
            ManagerError::Io(_) => ErrorKind::BackendUnavailable,
            ManagerError::InvalidStateFile(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManagerFile {
    version: u32,
    projects: Vec<Project>,
    keys: Vec<ApiKey>,
}

struct Registry {
    projects: HashMap<Uuid, Project>,
    caches: HashMap<Uuid, ProjectCache>,
    keys: HashMap<Uuid, KeyRing>,
    backends: HashMap<Uuid, Arc<dyn VectorBackend>>,
}

impl Registry {
    fn empty() -> Self {
        Self {
            projects: HashMap::new(),
            caches: HashMap::new(),
            keys: HashMap::new(),
            backends: HashMap::new(),
        }
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.projects
            .values()
            .any(|project| project.name == name && Some(project.project_id) != except)
    }
}

/// Process-wide project registry. One RwLock guards the registry; the rare
/// collection create/drop calls run with the write lock held, reads copy out
/// and release. Components refer to project resources by id through this
/// manager, never by direct pointer to each other.
pub struct ProjectManager {
    registry: RwLock<Registry>,
    backend_factory: Arc<dyn BackendFactory>,
    embedders: Arc<dyn EmbedderProvider>,
    metrics: Arc<MetricsRegistry>,
    audit: Option<Arc<dyn AuditSink>>,
    state_path: Option<PathBuf>,
    cache_capacity: usize,
    io_lock: Mutex<()>,
}

impl ProjectManager {
    pub fn new(
        backend_factory: Arc<dyn BackendFactory>,
        embedders: Arc<dyn EmbedderProvider>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry: RwLock::new(Registry::empty()),
            backend_factory,
            embedders,
            metrics,
            audit: None,
            state_path: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            io_lock: Mutex::new(()),
        }
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    /// Restores persisted projects and keys, reopening each collection.
    pub async fn load(&self) -> Result<(), ManagerError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let bytes = tokio::fs::read(path).await?;
        let first = bytes
            .iter()
            .find(|byte| !byte.is_ascii_whitespace())
            .copied();
        if first != Some(b'{') {
            return Err(ManagerError::InvalidStateFile(
                "state file is not a JSON object".to_string(),
            ));
        }
        let file: ManagerFile = serde_json::from_slice(&bytes)
            .map_err(|err| ManagerError::InvalidStateFile(err.to_string()))?;
        if file.version != MANAGER_FILE_VERSION {
            return Err(ManagerError::InvalidStateFile(format!(
                "unsupported state file version {}",
                file.version
            )));
        }

        let mut registry = self.registry.write().await;
        for project in file.projects {
            let dimension = self.embedders.dimension_of(&project.embedding_model);
            let backend = self
                .backend_factory
                .open_collection(&project.collection_name, dimension)
                .await?;
            let id = project.project_id;
            registry.backends.insert(id, backend);
            registry
                .caches
                .insert(id, Arc::new(LruCache::new(self.cache_capacity)));
            registry.keys.insert(id, KeyRing::new());
            registry.projects.insert(id, project);
        }
        for key in file.keys {
            registry
                .keys
                .entry(key.project_id)
                .or_insert_with(KeyRing::new)
                .from_persisted(key);
        }

        info!(projects = registry.projects.len(), "manager state restored");
        Ok(())
    }

    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        embedding_model: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<Project, ManagerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ManagerError::InvalidArgument(
                "project name must not be empty".to_string(),
            ));
        }

        let project = {
            let mut registry = self.registry.write().await;
            if registry.name_taken(name, None) {
                return Err(ManagerError::DuplicateName(name.to_string()));
            }

            let project = Project::new(name, description, embedding_model, metadata);
            let dimension = self.embedders.dimension_of(&project.embedding_model);
            let backend = self
                .backend_factory
                .open_collection(&project.collection_name, dimension)
                .await?;

            let id = project.project_id;
            registry.backends.insert(id, backend);
            registry
                .caches
                .insert(id, Arc::new(LruCache::new(self.cache_capacity)));
            registry.keys.insert(id, KeyRing::new());
            registry.projects.insert(id, project.clone());
            project
        };

        self.persist().await?;
        self.metrics.record_project_created();
        self.emit_audit(
            AuditEvent::new(AuditOperation::ProjectCreate, AuditOutcome::Succeeded)
                .with_project(project.project_id.to_string())
                .with_detail(project.name.clone()),
        );
        info!(project_id = %project.project_id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> Option<Project> {
        let registry = self.registry.read().await;
        registry.projects.get(&id).cloned()
    }

    pub async fn get_project_by_name(&self, name: &str) -> Option<Project> {
        let registry = self.registry.read().await;
        registry
            .projects
            .values()
            .find(|project| project.name == name)
            .cloned()
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        let registry = self.registry.read().await;
        let mut projects: Vec<Project> = registry.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    pub async fn update_project(
        &self,
        id: Uuid,
        patch: ProjectPatch,
    ) -> Result<Project, ManagerError> {
        if patch.is_empty() {
            return Err(ManagerError::InvalidArgument(
                "update patch must set at least one field".to_string(),
            ));
        }

        // The document count comes from the backend before the write lock is
        // taken; only the registry bookkeeping runs under it.
        let model_change = {
            let registry = self.registry.read().await;
            let project = registry.projects.get(&id).ok_or(ManagerError::NotFound(id))?;
            patch
                .embedding_model
                .as_ref()
                .is_some_and(|model| *model != project.embedding_model)
        };
        if model_change {
            let backend = self.get_backend(id).await?;
            let stats = backend.get_statistics().await?;
            if stats.total_documents > 0 {
                return Err(ManagerError::ModelChangeConflict);
            }
        }

        let project = {
            let mut registry = self.registry.write().await;
            if let Some(name) = &patch.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ManagerError::InvalidArgument(
                        "project name must not be empty".to_string(),
                    ));
                }
                if registry.name_taken(name, Some(id)) {
                    return Err(ManagerError::DuplicateName(name.to_string()));
                }
            }

            let collection_name = registry
                .projects
                .get(&id)
                .ok_or(ManagerError::NotFound(id))?
                .collection_name
                .clone();

            // An empty project may still change models; its collection is
            // rebuilt for the new dimension.
            if model_change {
                if let Some(model) = patch.embedding_model.as_deref() {
                    self.backend_factory.drop_collection(&collection_name).await?;
                    let backend = self
                        .backend_factory
                        .open_collection(&collection_name, self.embedders.dimension_of(model))
                        .await?;
                    registry.backends.insert(id, backend);
                }
            }

            let project = registry
                .projects
                .get_mut(&id)
                .ok_or(ManagerError::NotFound(id))?;
            if let Some(name) = patch.name {
                project.name = name.trim().to_string();
            }
            if let Some(description) = patch.description {
                project.description = description;
            }
            if let Some(model) = patch.embedding_model {
                project.embedding_model = model;
            }
            if let Some(metadata) = patch.metadata {
                project.metadata = metadata;
            }
            project.updated_at = chrono::Utc::now();
            project.clone()
        };

        self.persist().await?;
        self.metrics.record_project_updated();
        self.emit_audit(
            AuditEvent::new(AuditOperation::ProjectUpdate, AuditOutcome::Succeeded)
                .with_project(id.to_string()),
        );
        Ok(project)
    }

    /// Cascades to the backend collection, cache, keys and metrics. Deleting
    /// an unknown project is a no-op.
    pub async fn delete_project(&self, id: Uuid) -> Result<(), ManagerError> {
        let removed = {
            let mut registry = self.registry.write().await;
            let Some(project) = registry.projects.remove(&id) else {
                return Ok(());
            };
            registry.caches.remove(&id);
            registry.keys.remove(&id);
            let backend = registry.backends.remove(&id);

            if let Some(backend) = &backend {
                if let Err(err) = backend.close().await {
                    warn!(project_id = %id, error = %err, "backend close failed");
                }
            }
            self.backend_factory
                .drop_collection(&project.collection_name)
                .await?;
            project
        };

        self.persist().await?;
        self.metrics.record_project_deleted();
        self.metrics.remove_project(&id.to_string());
        self.emit_audit(
            AuditEvent::new(AuditOperation::ProjectDelete, AuditOutcome::Succeeded)
                .with_project(id.to_string())
                .with_detail(removed.name.clone()),
        );
        info!(project_id = %id, name = %removed.name, "project deleted");
        Ok(())
    }

    pub async fn get_project_cache(&self, id: Uuid) -> Result<ProjectCache, ManagerError> {
        let registry = self.registry.read().await;
        registry
            .caches
            .get(&id)
            .cloned()
            .ok_or(ManagerError::NotFound(id))
    }

    pub async fn get_backend(&self, id: Uuid) -> Result<Arc<dyn VectorBackend>, ManagerError> {
        let registry = self.registry.read().await;
        registry
            .backends
            .get(&id)
            .cloned()
            .ok_or(ManagerError::NotFound(id))
    }

    pub async fn create_api_key(
        &self,
        project_id: Uuid,
        name: &str,
        scopes: BTreeSet<Scope>,
        expires_days: Option<i64>,
    ) -> Result<GeneratedKey, ManagerError> {
        let generated = {
            let mut registry = self.registry.write().await;
            if !registry.projects.contains_key(&project_id) {
                return Err(ManagerError::NotFound(project_id));
            }
            let ring = registry.keys.entry(project_id).or_insert_with(KeyRing::new);
            let generated = ring.create(project_id, name, scopes, expires_days)?;
            let active = ring.active_count() as u64;
            self.metrics
                .set_api_keys_active(&project_id.to_string(), active);
            generated
        };

        self.persist().await?;
        self.emit_audit(
            AuditEvent::new(AuditOperation::ApiKeyCreate, AuditOutcome::Succeeded)
                .with_project(project_id.to_string())
                .with_detail(generated.api_key.key_id.clone()),
        );
        Ok(generated)
    }

    /// Never exposes raw key material; records carry only the hash.
    pub async fn list_api_keys(&self, project_id: Uuid) -> Result<Vec<ApiKey>, ManagerError> {
        let registry = self.registry.read().await;
        if !registry.projects.contains_key(&project_id) {
            return Err(ManagerError::NotFound(project_id));
        }
        Ok(registry
            .keys
            .get(&project_id)
            .map(KeyRing::list)
            .unwrap_or_default())
    }

    pub async fn revoke_api_key(
        &self,
        project_id: Uuid,
        key_id: &str,
    ) -> Result<(), ManagerError> {
        {
            let mut registry = self.registry.write().await;
            let ring = registry
                .keys
                .get_mut(&project_id)
                .ok_or(ManagerError::NotFound(project_id))?;
            ring.revoke(key_id)?;
            let active = ring.active_count() as u64;
            self.metrics
                .set_api_keys_active(&project_id.to_string(), active);
        }

        self.persist().await?;
        self.emit_audit(
            AuditEvent::new(AuditOperation::ApiKeyRevoke, AuditOutcome::Succeeded)
                .with_project(project_id.to_string())
                .with_detail(key_id.to_string()),
        );
        Ok(())
    }

    /// Scans all projects for the hash. Keys of one project can never
    /// validate against another; the match pins the project id.
    pub async fn validate_api_key(
        &self,
        raw: &str,
        required: Scope,
    ) -> Result<(Uuid, String), ManagerError> {
        let outcome = {
            let registry = self.registry.read().await;
            let mut outcome: Result<(Uuid, String), ApiKeyError> =
                Err(ApiKeyError::Unauthorized("unknown key".to_string()));
            for (project_id, ring) in &registry.keys {
                match ring.validate(raw, required) {
                    Ok(key_id) => {
                        outcome = Ok((*project_id, key_id));
                        break;
                    }
                    Err(ApiKeyError::Unauthorized(message))
                        if message != "unknown key" =>
                    {
                        outcome = Err(ApiKeyError::Unauthorized(message));
                        break;
                    }
                    Err(_) => {}
                }
            }
            outcome
        };

        match outcome {
            Ok((project_id, key_id)) => {
                self.metrics
                    .record_key_validation(&project_id.to_string(), "ok");
                // Best-effort last_used stamp: skipped under write contention.
                if let Ok(mut registry) = self.registry.try_write() {
                    if let Some(ring) = registry.keys.get_mut(&project_id) {
                        ring.touch(&key_id);
                    }
                }
                Ok((project_id, key_id))
            }
            Err(err) => {
                self.metrics.record_key_validation("unknown", "rejected");
                Err(err.into())
            }
        }
    }

    /// Full metadata export, for persistence round-trips and migrations.
    pub async fn export_projects(&self) -> Vec<Project> {
        let registry = self.registry.read().await;
        let mut projects: Vec<Project> = registry.projects.values().cloned().collect();
        projects.sort_by_key(|project| project.project_id);
        projects
    }

    /// Re-registers exported projects verbatim (ids, names, collection names).
    pub async fn import_projects(&self, projects: Vec<Project>) -> Result<(), ManagerError> {
        {
            let mut registry = self.registry.write().await;
            for project in projects {
                if registry.projects.contains_key(&project.project_id) {
                    return Err(ManagerError::DuplicateName(project.name));
                }
                if registry.name_taken(&project.name, None) {
                    return Err(ManagerError::DuplicateName(project.name));
                }
                let dimension = self.embedders.dimension_of(&project.embedding_model);
                let backend = self
                    .backend_factory
                    .open_collection(&project.collection_name, dimension)
                    .await?;
                let id = project.project_id;
                registry.backends.insert(id, backend);
                registry
                    .caches
                    .insert(id, Arc::new(LruCache::new(self.cache_capacity)));
                registry.keys.insert(id, KeyRing::new());
                registry.projects.insert(id, project);
            }
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), ManagerError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        let _io = self.io_lock.lock().await;
        let bytes = {
            let registry = self.registry.read().await;
            let mut projects: Vec<Project> = registry.projects.values().cloned().collect();
            projects.sort_by_key(|project| project.project_id);
            let mut keys: Vec<ApiKey> = registry
                .keys
                .values()
                .flat_map(|ring| ring.list())
                .collect();
            keys.sort_by(|a, b| a.key_id.cmp(&b.key_id));
            let file = ManagerFile {
                version: MANAGER_FILE_VERSION,
                projects,
                keys,
            };
            serde_json::to_vec(&file)
                .map_err(|err| ManagerError::InvalidStateFile(err.to_string()))?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    fn emit_audit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            if let Err(err) = sink.record(event) {
                warn!(error = %err, "audit sink rejected event");
            }
        }
    }
}
