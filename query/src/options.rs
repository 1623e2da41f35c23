use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage::backend::MetadataFilter;
use thiserror::Error;

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 1_000;
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

/// Typed search options; every field the caller can set is enumerated here.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub mode: SearchMode,
    /// Hybrid fusion weight: 1.0 is pure vector, 0.0 pure keyword.
    pub alpha: f32,
    pub use_mmr: bool,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 pure diversity.
    pub mmr_lambda: f32,
    pub expand_query: bool,
    pub use_cache: bool,
    pub filter: Option<MetadataFilter>,
    pub deadline: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            mode: SearchMode::Hybrid,
            alpha: 0.5,
            use_mmr: false,
            mmr_lambda: 0.5,
            expand_query: true,
            use_cache: true,
            filter: None,
            deadline: DEFAULT_QUERY_DEADLINE,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptionsError {
    #[error("top_k must be between 1 and {0}")]
    InvalidTopK(usize),
    #[error("alpha {0} must be within [0, 1]")]
    InvalidAlpha(f32),
    #[error("mmr_lambda {0} must be within [0, 1]")]
    InvalidLambda(f32),
}

impl SearchOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(OptionsError::InvalidTopK(MAX_TOP_K));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(OptionsError::InvalidAlpha(self.alpha));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(OptionsError::InvalidLambda(self.mmr_lambda));
        }
        Ok(())
    }
}
