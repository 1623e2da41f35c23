use atheneum_core::embedding::cosine_similarity;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Linear-scan dense index. Collections stay small enough per project that a
/// scan beats maintaining an approximate structure; swapping in an ANN index
/// only requires keeping the same insert/remove/search surface.
#[derive(Debug, Default)]
pub struct VectorIndex {
    embeddings: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, embedding: Vec<f32>) {
        self.embeddings.insert(id.into(), embedding);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.embeddings.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Vec<f32>> {
        self.embeddings.get(id)
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Top-k by cosine similarity, clamped to [0, 1]. Ties break on id so
    /// results are deterministic.
    pub fn search<F>(&self, query: &[f32], k: usize, mut accept: F) -> Vec<(String, f32)>
    where
        F: FnMut(&str) -> bool,
    {
        let mut scored: Vec<(String, f32)> = self
            .embeddings
            .iter()
            .filter(|(id, _)| accept(id))
            .map(|(id, embedding)| (id.clone(), cosine_similarity(query, embedding).max(0.0)))
            .collect();

        scored.sort_by(|a, b| match b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(k);
        scored
    }
}

/// Inverted keyword index: term -> document -> term frequency. Scores are raw
/// summed frequencies of matched query terms; non-negative by construction.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    postings: HashMap<String, HashMap<String, u32>>,
    doc_terms: HashMap<String, HashMap<String, u32>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_document(&mut self, id: impl Into<String>, text: &str) {
        let id = id.into();
        self.remove_document(&id);

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for term in tokenize(text) {
            *frequencies.entry(term).or_insert(0) += 1;
        }
        for (term, count) in &frequencies {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(id.clone(), *count);
        }
        self.doc_terms.insert(id, frequencies);
    }

    pub fn remove_document(&mut self, id: &str) -> bool {
        let Some(frequencies) = self.doc_terms.remove(id) else {
            return false;
        };
        for term in frequencies.keys() {
            if let Some(docs) = self.postings.get_mut(term) {
                docs.remove(id);
                if docs.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }

    pub fn search<F>(&self, query: &str, k: usize, mut accept: F) -> Vec<(String, f32)>
    where
        F: FnMut(&str) -> bool,
    {
        let mut scores: HashMap<String, f32> = HashMap::new();
        for term in tokenize(query) {
            if let Some(docs) = self.postings.get(&term) {
                for (id, count) in docs {
                    *scores.entry(id.clone()).or_insert(0.0) += *count as f32;
                }
            }
        }

        let mut scored: Vec<(String, f32)> = scores
            .into_iter()
            .filter(|(id, _)| accept(id))
            .collect();
        scored.sort_by(|a, b| match b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(k);
        scored
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_search_ranks_by_similarity() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0, 0.0, 0.0]);
        index.insert("b", vec![0.0, 1.0, 0.0]);
        index.insert("c", vec![0.9, 0.1, 0.0]);

        let results = index.search(&[1.0, 0.0, 0.0], 2, |_| true);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "c");
    }

    #[test]
    fn vector_search_clamps_negative_similarity() {
        let mut index = VectorIndex::new();
        index.insert("opposite", vec![-1.0, 0.0]);

        let results = index.search(&[1.0, 0.0], 1, |_| true);
        assert_eq!(results[0].1, 0.0);
    }

    #[test]
    fn vector_remove_is_idempotent() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0, 0.0]);
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn keyword_search_sums_term_frequencies() {
        let mut index = KeywordIndex::new();
        index.index_document("a", "rust rust systems programming");
        index.index_document("b", "rust once");

        let results = index.search("rust", 10, |_| true);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[0].1, 2.0);
        assert_eq!(results[1].0, "b");
        assert_eq!(results[1].1, 1.0);
    }

    #[test]
    fn keyword_reindex_replaces_old_terms() {
        let mut index = KeywordIndex::new();
        index.index_document("a", "alpha beta");
        index.index_document("a", "gamma");

        assert!(index.search("alpha", 10, |_| true).is_empty());
        assert_eq!(index.search("gamma", 10, |_| true).len(), 1);
    }

    #[test]
    fn keyword_search_respects_accept_filter() {
        let mut index = KeywordIndex::new();
        index.index_document("a", "shared term");
        index.index_document("b", "shared term");

        let results = index.search("shared", 10, |id| id == "b");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
    }
}
