pub mod auto;
pub mod code;
pub mod markdown;
pub mod recursive;
pub mod semantic;

pub use auto::AutoChunker;
pub use code::{CodeChunker, CodeConfig};
pub use markdown::{MarkdownChunker, MarkdownConfig};
pub use recursive::{RecursiveChunker, RecursiveConfig};
pub use semantic::{SemanticChunker, SemanticConfig};

use async_trait::async_trait;
use atheneum_core::embedding::EmbedError;
use atheneum_core::error::{AtheneumError, ErrorKind};
use atheneum_core::model::{word_count, Chunk, ChunkMetadata, ChunkType};
use std::collections::HashMap;
use thiserror::Error;

use crate::extract::file_extension;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunker configuration: {0}")]
    InvalidConfig(String),
    #[error("chunker embedding failed: {0}")]
    Embedding(#[from] EmbedError),
}

impl AtheneumError for ChunkError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            ChunkError::InvalidConfig(_) => ErrorKind::InvalidArgument,
            ChunkError::Embedding(err) => err.error_kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub doc_id: String,
    pub source_path: Option<String>,
}

impl ChunkContext {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            source_path: None,
        }
    }

    pub fn with_source_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = Some(source_path.into());
        self
    }

    pub fn extension(&self) -> Option<String> {
        self.source_path
            .as_deref()
            .map(file_extension)
            .filter(|ext| !ext.is_empty())
    }
}

/// Content-aware splitting capability. Every implementation tags its output
/// with its `strategy()` name and ids of the form `{doc_id}_chunk{i}`.
#[async_trait]
pub trait Chunker: Send + Sync {
    fn strategy(&self) -> &'static str;

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError>;
}

/// Intermediate piece a strategy produced, before indices are assigned.
#[derive(Debug, Clone)]
pub(crate) struct ChunkDraft {
    pub text: String,
    pub chunk_type: ChunkType,
    pub overlap_ratio: Option<f32>,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub extra: HashMap<String, String>,
}

impl ChunkDraft {
    pub fn text_block(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            chunk_type: ChunkType::Text,
            overlap_ratio: None,
            line_start: None,
            line_end: None,
            extra: HashMap::new(),
        }
    }
}

pub(crate) fn finalize(drafts: Vec<ChunkDraft>, ctx: &ChunkContext, strategy: &str) -> Vec<Chunk> {
    let total = drafts.len();
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let mut metadata = ChunkMetadata::new(&ctx.doc_id, strategy);
            metadata.chunk_index = index;
            metadata.total_chunks = total;
            metadata.chunk_type = draft.chunk_type;
            metadata.char_count = draft.text.chars().count();
            metadata.word_count = word_count(&draft.text);
            metadata.overlap_ratio = draft.overlap_ratio;
            metadata.line_start = draft.line_start;
            metadata.line_end = draft.line_end;
            metadata.extra = draft.extra;
            Chunk::new(draft.text, metadata)
        })
        .collect()
}
