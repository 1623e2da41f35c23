use atheneum_core::error::{AtheneumError, ErrorKind};
use atheneum_core::model::Document;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::fsio::write_atomic;
use crate::index::tokenize;

const REPO_FILE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("repository io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository cache file is invalid: {0}")]
    InvalidCacheFile(String),
}

impl AtheneumError for RepoError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            RepoError::NotFound(_) => ErrorKind::NotFound,
            RepoError::Io(_) => ErrorKind::BackendUnavailable,
            RepoError::InvalidCacheFile(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RepoFile {
    version: u32,
    documents: Vec<Document>,
    index: HashMap<String, Vec<String>>,
}

struct RepoState {
    documents: HashMap<String, Document>,
    index: HashMap<String, BTreeSet<String>>,
}

impl RepoState {
    fn empty() -> Self {
        Self {
            documents: HashMap::new(),
            index: HashMap::new(),
        }
    }

    fn index_document(&mut self, doc: &Document) {
        for term in tokenize(&doc.content) {
            self.index.entry(term).or_default().insert(doc.doc_id.clone());
        }
    }

    fn unindex_document(&mut self, doc: &Document) {
        for term in tokenize(&doc.content) {
            if let Some(ids) = self.index.get_mut(&term) {
                ids.remove(&doc.doc_id);
                if ids.is_empty() {
                    self.index.remove(&term);
                }
            }
        }
    }
}

/// Per-project document store. Writers mutate under the write lock; readers
/// copy what they need out and release before doing any work, so a slow
/// caller never extends lock hold time.
pub struct DocumentRepository {
    state: RwLock<RepoState>,
    cache_path: Option<PathBuf>,
    io_lock: Mutex<()>,
}

impl DocumentRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RepoState::empty()),
            cache_path: None,
            io_lock: Mutex::new(()),
        }
    }

    pub fn with_cache_path(path: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(RepoState::empty()),
            cache_path: Some(path.into()),
            io_lock: Mutex::new(()),
        }
    }

    pub async fn add_document(&self, doc: Document) -> Result<(), RepoError> {
        {
            let mut state = self.state.write().await;
            if let Some(previous) = state.documents.remove(&doc.doc_id) {
                state.unindex_document(&previous);
            }
            state.index_document(&doc);
            state.documents.insert(doc.doc_id.clone(), doc);
        }
        self.persist().await
    }

    /// Returns a deep copy; callers cannot reach repository internals.
    pub async fn get_document(&self, doc_id: &str) -> Option<Document> {
        let state = self.state.read().await;
        state.documents.get(doc_id).cloned()
    }

    pub async fn list_documents(&self) -> Vec<Document> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        docs
    }

    pub async fn document_count(&self) -> usize {
        let state = self.state.read().await;
        state.documents.len()
    }

    pub async fn delete(&self, doc_id: &str) -> Result<bool, RepoError> {
        let removed = {
            let mut state = self.state.write().await;
            match state.documents.remove(doc_id) {
                Some(doc) => {
                    state.unindex_document(&doc);
                    true
                }
                None => false,
            }
        };
        self.persist().await?;
        Ok(removed)
    }

    /// Swaps documents and term index in one critical section. A concurrent
    /// reader observes either the whole old state or the whole new one.
    pub async fn replace_index(
        &self,
        new_docs: HashMap<String, Document>,
        new_index: HashMap<String, BTreeSet<String>>,
    ) -> Result<(), RepoError> {
        {
            let mut state = self.state.write().await;
            state.documents = new_docs;
            state.index = new_index;
        }
        self.persist().await
    }

    /// Posting lists for the requested terms only: a shallow snapshot taken
    /// under one read-lock acquisition.
    pub async fn snapshot_terms(&self, terms: &[String]) -> HashMap<String, Vec<String>> {
        let state = self.state.read().await;
        terms
            .iter()
            .filter_map(|term| {
                state
                    .index
                    .get(term)
                    .map(|ids| (term.clone(), ids.iter().cloned().collect()))
            })
            .collect()
    }

    /// Full copy of documents plus term index, consistent as of one read lock.
    pub async fn snapshot(&self) -> (Vec<Document>, HashMap<String, Vec<String>>) {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        let index = state
            .index
            .iter()
            .map(|(term, ids)| (term.clone(), ids.iter().cloned().collect()))
            .collect();
        (docs, index)
    }

    async fn persist(&self) -> Result<(), RepoError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };

        let _io = self.io_lock.lock().await;
        let bytes = {
            let state = self.state.read().await;
            let mut documents: Vec<Document> = state.documents.values().cloned().collect();
            documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
            let index = state
                .index
                .iter()
                .map(|(term, ids)| (term.clone(), ids.iter().cloned().collect()))
                .collect();
            let file = RepoFile {
                version: REPO_FILE_VERSION,
                documents,
                index,
            };
            serde_json::to_vec(&file)
                .map_err(|err| RepoError::InvalidCacheFile(err.to_string()))?
        };
        write_atomic(path, &bytes).await?;
        Ok(())
    }

    /// Restores state from the cache file. Only strict JSON is accepted;
    /// binary or pickled payloads are refused outright.
    pub async fn load(&self) -> Result<(), RepoError> {
        let Some(path) = &self.cache_path else {
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
            return Err(RepoError::InvalidCacheFile(
                "cache file is not a JSON object".to_string(),
            ));
        }
        let file: RepoFile = serde_json::from_slice(&bytes)
            .map_err(|err| RepoError::InvalidCacheFile(err.to_string()))?;
        if file.version != REPO_FILE_VERSION {
            return Err(RepoError::InvalidCacheFile(format!(
                "unsupported cache file version {}",
                file.version
            )));
        }

        let mut state = RepoState::empty();
        for doc in file.documents {
            state.documents.insert(doc.doc_id.clone(), doc);
        }
        for (term, ids) in file.index {
            state.index.insert(term, ids.into_iter().collect());
        }

        let mut guard = self.state.write().await;
        *guard = state;
        Ok(())
    }
}

impl Default for DocumentRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the term index for a document set, for use with `replace_index`.
pub fn build_index(docs: &HashMap<String, Document>) -> HashMap<String, BTreeSet<String>> {
    let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
    for doc in docs.values() {
        for term in tokenize(&doc.content) {
            index.entry(term).or_default().insert(doc.doc_id.clone());
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn get_returns_deep_copy() {
        let repo = DocumentRepository::new();
        repo.add_document(Document::new("d1", "hello world"))
            .await
            .unwrap();

        let mut copy = repo.get_document("d1").await.unwrap();
        copy.content = "mutated".to_string();

        assert_eq!(repo.get_document("d1").await.unwrap().content, "hello world");
    }

    #[tokio::test]
    async fn delete_removes_document_and_postings() {
        let repo = DocumentRepository::new();
        repo.add_document(Document::new("d1", "unique glyph"))
            .await
            .unwrap();

        assert!(repo.delete("d1").await.unwrap());
        assert!(!repo.delete("d1").await.unwrap());
        assert!(repo
            .snapshot_terms(&["glyph".to_string()])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn reingest_replaces_old_terms() {
        let repo = DocumentRepository::new();
        repo.add_document(Document::new("d1", "alpha")).await.unwrap();
        repo.add_document(Document::new("d1", "beta")).await.unwrap();

        assert!(repo.snapshot_terms(&["alpha".to_string()]).await.is_empty());
        let snapshot = repo.snapshot_terms(&["beta".to_string()]).await;
        assert_eq!(snapshot["beta"], vec!["d1".to_string()]);
        assert_eq!(repo.document_count().await, 1);
    }

    #[tokio::test]
    async fn persistence_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.json");

        {
            let repo = DocumentRepository::with_cache_path(&path);
            repo.add_document(Document::new("d1", "stored content"))
                .await
                .unwrap();
        }

        let restored = DocumentRepository::with_cache_path(&path);
        restored.load().await.unwrap();
        assert_eq!(
            restored.get_document("d1").await.unwrap().content,
            "stored content"
        );
        let snapshot = restored.snapshot_terms(&["stored".to_string()]).await;
        assert_eq!(snapshot["stored"], vec!["d1".to_string()]);
    }

    #[tokio::test]
    async fn load_refuses_binary_cache_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.json");
        tokio::fs::write(&path, [0x80u8, 0x04, 0x95, 0x01]).await.unwrap();

        let repo = DocumentRepository::with_cache_path(&path);
        let result = repo.load().await;
        assert!(matches!(result, Err(RepoError::InvalidCacheFile(_))));
    }

    #[tokio::test]
    async fn replace_index_swaps_both_maps() {
        let repo = DocumentRepository::new();
        repo.add_document(Document::new("old", "old content"))
            .await
            .unwrap();

        let mut new_docs = HashMap::new();
        new_docs.insert("new".to_string(), Document::new("new", "new content"));
        let new_index = build_index(&new_docs);
        repo.replace_index(new_docs, new_index).await.unwrap();

        assert!(repo.get_document("old").await.is_none());
        assert!(repo.get_document("new").await.is_some());
        assert!(repo.snapshot_terms(&["old".to_string()]).await.is_empty());
    }
}
