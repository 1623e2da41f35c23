use async_trait::async_trait;
use atheneum_core::cache::{CacheStats, LruCache};
use atheneum_core::embedding::{l2_normalize, EmbedError, Embedder};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// LRU in front of an [`Embedder`], keyed by `sha256(model_id, text)`.
/// Vectors are unit-normalized before caching; zero-length or non-finite
/// vectors never enter the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: LruCache<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: LruCache::new(capacity),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_id().as_bytes());
        hasher.update(b"\0");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn sanitize(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        if vector.len() != self.inner.dimension() || !l2_normalize(&mut vector) {
            return Err(EmbedError::InvalidVector);
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let key = self.cache_key(text);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }

        let vector = self.sanitize(self.inner.embed(text).await?)?;
        self.cache.put(key, vector.clone());
        Ok(vector)
    }

    /// Splits the batch into cache hits and misses, issues one backend batch
    /// for the misses, and reassembles results in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for (idx, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            match self.cache.get(&key) {
                Some(vector) => results[idx] = Some(vector),
                None => {
                    miss_indices.push(idx);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(EmbedError::Backend(format!(
                    "embedder returned {} vectors for {} inputs",
                    fresh.len(),
                    miss_texts.len()
                )));
            }
            for (slot, vector) in miss_indices.iter().zip(fresh) {
                let vector = self.sanitize(vector)?;
                self.cache
                    .put(self.cache_key(&texts[*slot]), vector.clone());
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|slot| slot.unwrap()).collect())
    }
}
