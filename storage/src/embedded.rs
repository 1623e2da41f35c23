use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::backend::{
    BackendError, BackendFactory, BackendHealth, BackendStats, HealthStatus, MetadataFilter,
    SearchHit, VectorBackend,
};
use crate::fsio::{read_strict_json, write_atomic};
use crate::index::{KeywordIndex, VectorIndex};

const COLLECTION_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    embedding: Vec<f32>,
    text: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    version: u32,
    collection: String,
    dimension: usize,
    records: Vec<StoredRecord>,
}

struct CollectionState {
    records: HashMap<String, StoredRecord>,
    vectors: VectorIndex,
    keywords: KeywordIndex,
}

impl CollectionState {
    fn empty() -> Self {
        Self {
            records: HashMap::new(),
            vectors: VectorIndex::new(),
            keywords: KeywordIndex::new(),
        }
    }

    fn upsert(&mut self, record: StoredRecord) {
        self.vectors.insert(record.id.clone(), record.embedding.clone());
        self.keywords.index_document(record.id.clone(), &record.text);
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> bool {
        let existed = self.records.remove(id).is_some();
        self.vectors.remove(id);
        self.keywords.remove_document(id);
        existed
    }
}

/// Single-process reference backend: one JSON file per collection, a linear
/// dense index and an inverted keyword index rebuilt at load.
pub struct EmbeddedVectorStore {
    collection: String,
    dimension: usize,
    path: Option<PathBuf>,
    state: RwLock<Option<CollectionState>>,
    io_lock: Mutex<()>,
}

impl EmbeddedVectorStore {
    pub fn new(collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            collection: collection.into(),
            dimension,
            path: None,
            state: RwLock::new(None),
            io_lock: Mutex::new(()),
        }
    }

    pub fn with_path(
        collection: impl Into<String>,
        dimension: usize,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            collection: collection.into(),
            dimension,
            path: Some(path.into()),
            state: RwLock::new(None),
            io_lock: Mutex::new(()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn load_state(&self) -> Result<CollectionState, BackendError> {
        let Some(path) = &self.path else {
            return Ok(CollectionState::empty());
        };
        if !path.exists() {
            return Ok(CollectionState::empty());
        }

        let bytes = read_strict_json(path).await?;
        let file: CollectionFile = serde_json::from_slice(&bytes)
            .map_err(|err| BackendError::Corrupt(format!("collection file: {}", err)))?;
        if file.version != COLLECTION_FILE_VERSION {
            return Err(BackendError::Corrupt(format!(
                "unsupported collection file version {}",
                file.version
            )));
        }
        if file.dimension != self.dimension {
            return Err(BackendError::Corrupt(format!(
                "collection dimension {} does not match configured {}",
                file.dimension, self.dimension
            )));
        }

        let mut state = CollectionState::empty();
        for record in file.records {
            state.upsert(record);
        }
        Ok(state)
    }

    /// Serializes under the read lock, then writes with no state lock held.
    async fn persist(&self) -> Result<(), BackendError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _io = self.io_lock.lock().await;
        let bytes = {
            let guard = self.state.read().await;
            let state = guard.as_ref().ok_or(BackendError::NotReady)?;
            let mut records: Vec<StoredRecord> = state.records.values().cloned().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            let file = CollectionFile {
                version: COLLECTION_FILE_VERSION,
                collection: self.collection.clone(),
                dimension: self.dimension,
                records,
            };
            serde_json::to_vec(&file)
                .map_err(|err| BackendError::Corrupt(format!("serialize collection: {}", err)))?
        };
        write_atomic(path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for EmbeddedVectorStore {
    async fn initialize(&self) -> Result<(), BackendError> {
        {
            let guard = self.state.read().await;
            if guard.is_some() {
                return Ok(());
            }
        }

        let loaded = self.load_state().await?;
        let mut guard = self.state.write().await;
        if guard.is_none() {
            info!(
                collection = %self.collection,
                records = loaded.records.len(),
                "embedded collection opened"
            );
            *guard = Some(loaded);
        }
        Ok(())
    }

    async fn add_documents(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[HashMap<String, String>],
    ) -> Result<(), BackendError> {
        if ids.len() != embeddings.len() || ids.len() != texts.len() || ids.len() != metadatas.len()
        {
            return Err(BackendError::InvalidArgument(format!(
                "mismatched lengths: {} ids, {} embeddings, {} texts, {} metadatas",
                ids.len(),
                embeddings.len(),
                texts.len(),
                metadatas.len()
            )));
        }
        for embedding in embeddings {
            if embedding.len() != self.dimension {
                return Err(BackendError::InvalidArgument(format!(
                    "embedding dimension {} does not match collection dimension {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        {
            let mut guard = self.state.write().await;
            let state = guard.as_mut().ok_or(BackendError::NotReady)?;
            for idx in 0..ids.len() {
                state.upsert(StoredRecord {
                    id: ids[idx].clone(),
                    embedding: embeddings[idx].clone(),
                    text: texts[idx].clone(),
                    metadata: metadatas[idx].clone(),
                });
            }
        }
        self.persist().await
    }

    async fn query_vector(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, BackendError> {
        if query.len() != self.dimension {
            return Err(BackendError::InvalidArgument(format!(
                "query dimension {} does not match collection dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BackendError::NotReady)?;
        let scored = state.vectors.search(query, top_k, |id| {
            filter_accepts(filter, state.records.get(id))
        });

        Ok(scored
            .into_iter()
            .map(|(id, score)| {
                let metadata = state
                    .records
                    .get(&id)
                    .map(|record| record.metadata.clone())
                    .unwrap_or_default();
                SearchHit { id, score, metadata }
            })
            .collect())
    }

    async fn query_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, BackendError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BackendError::NotReady)?;
        let scored = state.keywords.search(query, top_k, |id| {
            filter_accepts(filter, state.records.get(id))
        });

        Ok(scored
            .into_iter()
            .map(|(id, score)| {
                let metadata = state
                    .records
                    .get(&id)
                    .map(|record| record.metadata.clone())
                    .unwrap_or_default();
                SearchHit { id, score, metadata }
            })
            .collect())
    }

    async fn fetch_vectors(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>, BackendError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BackendError::NotReady)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .records
                    .get(id)
                    .map(|record| (id.clone(), record.embedding.clone()))
            })
            .collect())
    }

    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filter: Option<&MetadataFilter>,
    ) -> Result<usize, BackendError> {
        if ids.is_none() && filter.is_none() {
            return Err(BackendError::InvalidArgument(
                "delete requires ids or a filter".to_string(),
            ));
        }

        let removed = {
            let mut guard = self.state.write().await;
            let state = guard.as_mut().ok_or(BackendError::NotReady)?;

            let mut victims: Vec<String> = Vec::new();
            if let Some(ids) = ids {
                victims.extend(ids.iter().cloned());
            }
            if let Some(filter) = filter {
                victims.extend(
                    state
                        .records
                        .values()
                        .filter(|record| filter.matches(&record.metadata))
                        .map(|record| record.id.clone()),
                );
            }
            victims.sort();
            victims.dedup();

            victims
                .iter()
                .filter(|id| state.remove(id))
                .count()
        };

        self.persist().await?;
        Ok(removed)
    }

    async fn get_statistics(&self) -> Result<BackendStats, BackendError> {
        let total_documents = {
            let guard = self.state.read().await;
            let state = guard.as_ref().ok_or(BackendError::NotReady)?;
            state.records.len()
        };

        let storage_size_bytes = match &self.path {
            Some(path) => tokio::fs::metadata(path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0),
            None => 0,
        };

        Ok(BackendStats {
            backend: "embedded".to_string(),
            collection: self.collection.clone(),
            total_documents,
            embedding_dimension: self.dimension,
            storage_size_bytes,
            index_type: "linear".to_string(),
        })
    }

    async fn get_health(&self) -> BackendHealth {
        let start = Instant::now();
        let guard = self.state.read().await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match guard.as_ref() {
            Some(_) => BackendHealth {
                status: HealthStatus::Healthy,
                latency_ms,
                error: None,
            },
            None => BackendHealth {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some("collection is not initialized".to_string()),
            },
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        {
            let guard = self.state.read().await;
            if guard.is_none() {
                return Ok(());
            }
        }
        self.persist().await?;
        let mut guard = self.state.write().await;
        *guard = None;
        Ok(())
    }
}

fn filter_accepts(filter: Option<&MetadataFilter>, record: Option<&StoredRecord>) -> bool {
    match (filter, record) {
        (None, _) => true,
        (Some(filter), Some(record)) => filter.matches(&record.metadata),
        (Some(_), None) => false,
    }
}

/// Factory for [`EmbeddedVectorStore`] collections rooted at `data_dir`.
/// Collection files are named after the collection itself.
pub struct EmbeddedBackendFactory {
    data_dir: PathBuf,
}

impl EmbeddedBackendFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn collection_path(&self, collection_name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", collection_name))
    }
}

#[async_trait]
impl BackendFactory for EmbeddedBackendFactory {
    async fn open_collection(
        &self,
        collection_name: &str,
        dimension: usize,
    ) -> Result<Arc<dyn VectorBackend>, BackendError> {
        let store = EmbeddedVectorStore::with_path(
            collection_name,
            dimension,
            self.collection_path(collection_name),
        );
        store.initialize().await?;
        Ok(Arc::new(store))
    }

    async fn drop_collection(&self, collection_name: &str) -> Result<(), BackendError> {
        let path = self.collection_path(collection_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(doc: &str) -> HashMap<String, String> {
        HashMap::from([("parent_doc_id".to_string(), doc.to_string())])
    }

    async fn store_with(records: &[(&str, Vec<f32>, &str)]) -> EmbeddedVectorStore {
        let store = EmbeddedVectorStore::new("kb_test", records[0].1.len());
        store.initialize().await.unwrap();
        let ids: Vec<String> = records.iter().map(|(id, _, _)| id.to_string()).collect();
        let embeddings: Vec<Vec<f32>> = records.iter().map(|(_, e, _)| e.clone()).collect();
        let texts: Vec<String> = records.iter().map(|(_, _, t)| t.to_string()).collect();
        let metadatas: Vec<HashMap<String, String>> =
            records.iter().map(|(id, _, _)| meta(id)).collect();
        store
            .add_documents(&ids, &embeddings, &texts, &metadatas)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn queries_before_initialize_are_not_ready() {
        let store = EmbeddedVectorStore::new("kb_test", 2);
        let result = store.query_vector(&[1.0, 0.0], 3, None).await;
        assert!(matches!(result, Err(BackendError::NotReady)));
    }

    #[tokio::test]
    async fn add_rejects_mismatched_lengths() {
        let store = EmbeddedVectorStore::new("kb_test", 2);
        store.initialize().await.unwrap();
        let result = store
            .add_documents(&["a".to_string()], &[], &[], &[])
            .await;
        assert!(matches!(result, Err(BackendError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let store = store_with(&[("a", vec![1.0, 0.0], "first text")]).await;
        store
            .add_documents(
                &["a".to_string()],
                &[vec![0.0, 1.0]],
                &["replaced text".to_string()],
                &[meta("a")],
            )
            .await
            .unwrap();

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_documents, 1);

        let hits = store.query_keyword("replaced", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.query_keyword("first", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_query_respects_filter() {
        let store = store_with(&[
            ("a", vec![1.0, 0.0], "alpha"),
            ("b", vec![0.9, 0.1], "beta"),
        ])
        .await;

        let filter = MetadataFilter::equals("parent_doc_id", "b");
        let hits = store
            .query_vector(&[1.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn delete_requires_ids_or_filter() {
        let store = store_with(&[("a", vec![1.0, 0.0], "alpha")]).await;
        let result = store.delete_documents(None, None).await;
        assert!(matches!(result, Err(BackendError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn delete_by_filter_counts_removed() {
        let store = store_with(&[
            ("a", vec![1.0, 0.0], "alpha"),
            ("b", vec![0.0, 1.0], "beta"),
        ])
        .await;

        let filter = MetadataFilter::equals("parent_doc_id", "a");
        let removed = store.delete_documents(None, Some(&filter)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_statistics().await.unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn collection_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kb_round.json");

        {
            let store = EmbeddedVectorStore::with_path("kb_round", 2, &path);
            store.initialize().await.unwrap();
            store
                .add_documents(
                    &["a".to_string()],
                    &[vec![1.0, 0.0]],
                    &["persisted text".to_string()],
                    &[meta("a")],
                )
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let reopened = EmbeddedVectorStore::with_path("kb_round", 2, &path);
        reopened.initialize().await.unwrap();
        let hits = reopened.query_keyword("persisted", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn load_rejects_non_json_collection_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kb_bad.json");
        tokio::fs::write(&path, [0x80u8, 0x02, 0x95]).await.unwrap();

        let store = EmbeddedVectorStore::with_path("kb_bad", 2, &path);
        let result = store.initialize().await;
        assert!(matches!(result, Err(BackendError::Corrupt(_))));
    }

    #[tokio::test]
    async fn factory_drop_collection_is_idempotent() {
        let dir = tempdir().unwrap();
        let factory = EmbeddedBackendFactory::new(dir.path());

        let backend = factory.open_collection("kb_x", 2).await.unwrap();
        backend
            .add_documents(
                &["a".to_string()],
                &[vec![1.0, 0.0]],
                &["text".to_string()],
                &[meta("a")],
            )
            .await
            .unwrap();

        factory.drop_collection("kb_x").await.unwrap();
        factory.drop_collection("kb_x").await.unwrap();
        assert!(!dir.path().join("kb_x.json").exists());
    }

    #[tokio::test]
    async fn health_reports_initialization_state() {
        let store = EmbeddedVectorStore::new("kb_h", 2);
        assert_eq!(store.get_health().await.status, HealthStatus::Unhealthy);
        store.initialize().await.unwrap();
        assert_eq!(store.get_health().await.status, HealthStatus::Healthy);
    }
}
