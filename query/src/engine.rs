use atheneum_core::embedding::cosine_similarity;
use atheneum_core::error::{AtheneumError, ErrorKind};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::backend::{BackendError, MetadataFilter, SearchHit, VectorBackend};
use thiserror::Error;
use tracing::warn;

pub const RRF_K: f32 = 60.0;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const BACKEND_CALL_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("backend is not ready")]
    NotReady,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("internal retrieval error: {0}")]
    Internal(String),
}

impl AtheneumError for EngineError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            EngineError::EmptyQuery | EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::NotReady => ErrorKind::NotReady,
            EngineError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Underlying retrieval mode for MMR candidate generation.
#[derive(Debug, Clone)]
pub enum MmrMode {
    Vector,
    Hybrid { query_text: String, alpha: f32 },
}

/// Thread-safe reader over one project's vector backend. All scoring runs on
/// owned candidate snapshots; no backend lock is held while ranking.
pub struct RetrievalEngine {
    backend: Arc<dyn VectorBackend>,
    retry_backoff: Duration,
}

impl RetrievalEngine {
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            backend,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn search_vector(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query_vec.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        validate_top_k(top_k)?;

        self.with_retry(|| self.backend.query_vector(query_vec, top_k, filter))
            .await
    }

    pub async fn search_keyword(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query_text.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        validate_top_k(top_k)?;

        self.with_retry(|| self.backend.query_keyword(query_text, top_k, filter))
            .await
    }

    /// Reciprocal Rank Fusion over the backend's vector and keyword lists.
    /// Backends offering a native hybrid query are used as-is; otherwise the
    /// engine fuses locally.
    pub async fn search_hybrid(
        &self,
        query_vec: &[f32],
        query_text: &str,
        top_k: usize,
        alpha: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query_vec.is_empty() || query_text.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        validate_top_k(top_k)?;
        validate_unit_interval("alpha", alpha)?;

        match self
            .backend
            .query_hybrid(query_vec, query_text, top_k, alpha, filter)
            .await
        {
            Ok(hits) => return Ok(hits),
            Err(BackendError::HybridUnsupported) => {}
            Err(err) if is_transient(&err) => {
                warn!(error = %err, "native hybrid failed, falling back to local fusion");
            }
            Err(err) => return Err(map_backend_error(err)),
        }

        let depth = top_k.max(20);
        let vector_hits = self
            .with_retry(|| self.backend.query_vector(query_vec, depth, filter))
            .await?;
        let keyword_hits = self
            .with_retry(|| self.backend.query_keyword(query_text, depth, filter))
            .await?;

        Ok(fuse_rrf(vector_hits, keyword_hits, alpha, top_k, depth))
    }

    /// Maximal Marginal Relevance over roughly `2 * top_k` candidates from
    /// the chosen mode. Candidate embeddings come from the backend; scoring
    /// is pure computation on the copied slice.
    pub async fn search_with_mmr(
        &self,
        query_vec: &[f32],
        lambda: f32,
        top_k: usize,
        mode: MmrMode,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query_vec.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        validate_top_k(top_k)?;
        validate_unit_interval("lambda", lambda)?;

        let pool = top_k.saturating_mul(2);
        let candidates = match &mode {
            MmrMode::Vector => self.search_vector(query_vec, pool, None).await?,
            MmrMode::Hybrid { query_text, alpha } => {
                self.search_hybrid(query_vec, query_text, pool, *alpha, None)
                    .await?
            }
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = candidates.iter().map(|hit| hit.id.clone()).collect();
        let embeddings = self
            .with_retry(|| self.backend.fetch_vectors(&ids))
            .await?;

        Ok(mmr_select(query_vec, candidates, &embeddings, lambda, top_k))
    }

    /// One retry with a linear backoff before a transient failure surfaces.
    /// Each attempt runs under the backend call deadline; a timed-out call
    /// counts as transient.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match bounded(op()).await {
            Ok(value) => Ok(value),
            Err(err) if is_transient(&err) => {
                warn!(error = %err, "backend call failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                bounded(op()).await.map_err(map_backend_error)
            }
            Err(err) => Err(map_backend_error(err)),
        }
    }
}

async fn bounded<T, Fut>(fut: Fut) -> Result<T, BackendError>
where
    Fut: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(BACKEND_CALL_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Unavailable(
            "backend call exceeded its deadline".to_string(),
        )),
    }
}

fn validate_top_k(top_k: usize) -> Result<(), EngineError> {
    if top_k == 0 {
        return Err(EngineError::InvalidArgument(
            "top_k must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_unit_interval(name: &str, value: f32) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::InvalidArgument(format!(
            "{} {} must be within [0, 1]",
            name, value
        )));
    }
    Ok(())
}

fn is_transient(err: &BackendError) -> bool {
    matches!(err, BackendError::Unavailable(_) | BackendError::Io(_))
}

fn map_backend_error(err: BackendError) -> EngineError {
    match err {
        BackendError::NotReady => EngineError::NotReady,
        BackendError::Unavailable(message) => EngineError::BackendUnavailable(message),
        BackendError::Io(err) => EngineError::BackendUnavailable(err.to_string()),
        BackendError::InvalidArgument(message) => EngineError::InvalidArgument(message),
        BackendError::HybridUnsupported => {
            EngineError::Internal("hybrid fallback mis-routed".to_string())
        }
        BackendError::Corrupt(message) => EngineError::Internal(message),
    }
}

struct FusionSlot {
    vector_rank: usize,
    keyword_rank: usize,
    metadata: HashMap<String, String>,
    has_vector_metadata: bool,
}

/// RRF(d) = alpha / (k + r_v) + (1 - alpha) / (k + r_k), ranks dense from 1,
/// absent ranks pinned at `depth + 1000`. Ties break by vector rank, then
/// keyword rank, then id.
pub fn fuse_rrf(
    vector_hits: Vec<SearchHit>,
    keyword_hits: Vec<SearchHit>,
    alpha: f32,
    top_k: usize,
    depth: usize,
) -> Vec<SearchHit> {
    let sentinel = depth + 1000;
    let mut slots: BTreeMap<String, FusionSlot> = BTreeMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        slots.insert(
            hit.id,
            FusionSlot {
                vector_rank: rank + 1,
                keyword_rank: sentinel,
                metadata: hit.metadata,
                has_vector_metadata: true,
            },
        );
    }
    for (rank, hit) in keyword_hits.into_iter().enumerate() {
        let slot = slots.entry(hit.id).or_insert(FusionSlot {
            vector_rank: sentinel,
            keyword_rank: sentinel,
            metadata: HashMap::new(),
            has_vector_metadata: false,
        });
        slot.keyword_rank = rank + 1;
        if !slot.has_vector_metadata {
            slot.metadata = hit.metadata;
        }
    }

    let mut fused: Vec<(String, f32, FusionSlot)> = slots
        .into_iter()
        .map(|(id, slot)| {
            let score = alpha / (RRF_K + slot.vector_rank as f32)
                + (1.0 - alpha) / (RRF_K + slot.keyword_rank as f32);
            (id, score, slot)
        })
        .collect();

    fused.sort_by(|a, b| {
        match b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal) {
            Ordering::Equal => {}
            other => return other,
        }
        match a.2.vector_rank.cmp(&b.2.vector_rank) {
            Ordering::Equal => {}
            other => return other,
        }
        match a.2.keyword_rank.cmp(&b.2.keyword_rank) {
            Ordering::Equal => {}
            other => return other,
        }
        a.0.cmp(&b.0)
    });

    fused
        .into_iter()
        .take(top_k)
        .map(|(id, score, slot)| SearchHit {
            id,
            score,
            metadata: slot.metadata,
        })
        .collect()
}

/// Greedy selection: next = argmax lambda * sim(d, q) - (1 - lambda) *
/// max_{s in S} sim(d, s). The first pick is the most relevant candidate.
pub fn mmr_select(
    query_vec: &[f32],
    candidates: Vec<SearchHit>,
    embeddings: &HashMap<String, Vec<f32>>,
    lambda: f32,
    top_k: usize,
) -> Vec<SearchHit> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|hit| match embeddings.get(&hit.id) {
            Some(embedding) => cosine_similarity(query_vec, embedding),
            None => hit.score,
        })
        .collect();

    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < top_k && !remaining.is_empty() {
        let best = if selected.is_empty() {
            best_by(&remaining, |idx| relevance[idx])
        } else {
            best_by(&remaining, |idx| {
                let redundancy = selected
                    .iter()
                    .map(|picked| pair_similarity(&candidates, embeddings, idx, *picked))
                    .fold(f32::MIN, f32::max);
                lambda * relevance[idx] - (1.0 - lambda) * redundancy
            })
        };

        let position = remaining
            .iter()
            .position(|idx| *idx == best)
            .expect("winner drawn from remaining");
        remaining.remove(position);
        selected.push(best);
    }

    selected
        .into_iter()
        .map(|idx| candidates[idx].clone())
        .collect()
}

fn best_by<F: Fn(usize) -> f32>(remaining: &[usize], score: F) -> usize {
    let mut best_idx = remaining[0];
    let mut best_score = score(best_idx);
    for idx in remaining.iter().skip(1) {
        let candidate_score = score(*idx);
        if candidate_score > best_score {
            best_score = candidate_score;
            best_idx = *idx;
        }
    }
    best_idx
}

fn pair_similarity(
    candidates: &[SearchHit],
    embeddings: &HashMap<String, Vec<f32>>,
    a: usize,
    b: usize,
) -> f32 {
    match (
        embeddings.get(&candidates[a].id),
        embeddings.get(&candidates[b].id),
    ) {
        (Some(left), Some(right)) => cosine_similarity(left, right),
        _ => 0.0,
    }
}
