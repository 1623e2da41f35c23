use atheneum_core::embedding::cosine_similarity;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use storage::backend::MetadataFilter;

use crate::options::{SearchMode, SearchOptions};

/// Tuning for the embedding-keyed query cache.
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    /// Maximum number of entries to keep.
    pub max_entries: usize,
    /// Minimum cosine similarity for a non-exact hit (0.0 - 1.0).
    pub similarity_threshold: f32,
    /// Entry time-to-live. None disables expiry.
    pub ttl_seconds: Option<u64>,
    /// Queries shorter than this are never cached.
    pub min_query_length: usize,
    /// When false, insert/lookup become no-ops.
    pub enabled: bool,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            similarity_threshold: 0.95,
            ttl_seconds: Some(3600),
            min_query_length: 3,
            enabled: true,
        }
    }
}

/// Retrieval settings an entry was produced under. Lookups only ever match
/// entries with an identical key, so results computed at one alpha, lambda
/// or filter never leak into a query issued with another.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticCacheKey {
    pub mode: SearchMode,
    pub top_k: usize,
    pub alpha: f32,
    pub use_mmr: bool,
    pub mmr_lambda: f32,
    pub filter: Option<MetadataFilter>,
}

impl SemanticCacheKey {
    pub fn from_options(options: &SearchOptions) -> Self {
        Self {
            mode: options.mode,
            top_k: options.top_k,
            alpha: options.alpha,
            use_mmr: options.use_mmr,
            mmr_lambda: options.mmr_lambda,
            filter: options.filter.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    key: SemanticCacheKey,
    text: String,
    normalized: String,
    embedding: Vec<f32>,
    value: T,
    created_at: Instant,
    last_used: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
    pub value: T,
    pub similarity: f32,
    pub matched_text: String,
}

/// Query-result cache keyed by embedding similarity within one retrieval
/// configuration. An exact text match short-circuits at similarity 1.0;
/// otherwise a linear scan returns the most similar unexpired entry above
/// the threshold, most recent on ties. Expired entries are dropped lazily on
/// lookup; overflow evicts the least recently used entry.
#[derive(Debug, Clone)]
pub struct SemanticCache<T> {
    config: SemanticCacheConfig,
    entries: VecDeque<CacheEntry<T>>,
}

impl<T: Clone> SemanticCache<T> {
    pub fn with_config(config: SemanticCacheConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn put(&mut self, key: SemanticCacheKey, text: &str, embedding: Vec<f32>, value: T) {
        if !self.config.enabled
            || self.config.max_entries == 0
            || text.len() < self.config.min_query_length
        {
            return;
        }

        let normalized = normalize_query(text);
        if let Some(existing) = self
            .entries
            .iter()
            .position(|entry| entry.key == key && entry.normalized == normalized)
        {
            self.entries.remove(existing);
        }

        while self.entries.len() >= self.config.max_entries {
            self.evict_lru();
        }

        let now = Instant::now();
        self.entries.push_back(CacheEntry {
            key,
            text: text.to_string(),
            normalized,
            embedding,
            value,
            created_at: now,
            last_used: now,
        });
    }

    pub fn get(
        &mut self,
        key: &SemanticCacheKey,
        text: &str,
        embedding: &[f32],
    ) -> Option<CacheHit<T>> {
        if !self.config.enabled || text.len() < self.config.min_query_length {
            return None;
        }
        self.drop_expired();
        if self.entries.is_empty() {
            return None;
        }

        let normalized = normalize_query(text);
        if let Some(idx) = self
            .entries
            .iter()
            .position(|entry| entry.key == *key && entry.normalized == normalized)
        {
            return Some(self.take_hit(idx, 1.0));
        }

        let mut best: Option<(usize, f32)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.key != *key {
                continue;
            }
            let similarity = cosine_similarity(embedding, &entry.embedding);
            if similarity < self.config.similarity_threshold {
                continue;
            }
            let replace = best.is_none_or(|(best_idx, best_score)| {
                matches!(similarity.partial_cmp(&best_score), Some(Ordering::Greater))
                    || (matches!(similarity.partial_cmp(&best_score), Some(Ordering::Equal))
                        && idx > best_idx)
            });
            if replace {
                best = Some((idx, similarity));
            }
        }

        let (idx, similarity) = best?;
        Some(self.take_hit(idx, similarity))
    }

    /// Batch-populate, e.g. with warming queries at startup.
    pub fn warm<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (SemanticCacheKey, String, Vec<f32>, T)>,
    {
        for (key, text, embedding, value) in entries {
            self.put(key, &text, embedding, value);
        }
    }

    fn take_hit(&mut self, idx: usize, similarity: f32) -> CacheHit<T> {
        let mut entry = self.entries.remove(idx).expect("index within bounds");
        entry.last_used = Instant::now();
        let hit = CacheHit {
            value: entry.value.clone(),
            similarity,
            matched_text: entry.text.clone(),
        };
        self.entries.push_back(entry);
        hit
    }

    fn drop_expired(&mut self) {
        let Some(ttl) = self.config.ttl_seconds else {
            return;
        };
        let ttl = Duration::from_secs(ttl);
        self.entries.retain(|entry| entry.created_at.elapsed() <= ttl);
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(idx, _)| idx);
        if let Some(idx) = victim {
            self.entries.remove(idx);
        }
    }
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
