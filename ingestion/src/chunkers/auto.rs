use async_trait::async_trait;
use atheneum_core::embedding::Embedder;
use atheneum_core::model::Chunk;
use std::sync::Arc;

use super::{
    ChunkContext, ChunkError, Chunker, CodeChunker, CodeConfig, MarkdownChunker, MarkdownConfig,
    RecursiveChunker, RecursiveConfig, SemanticChunker, SemanticConfig,
};

pub const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "mjs", "ts", "tsx", "go", "java", "c", "h", "cpp", "cc", "cxx",
    "hpp", "rb",
];

const SEMANTIC_SENTENCE_MINIMUM: usize = 5;

/// Dispatches to a concrete strategy from content descriptors; first match
/// wins: code extension, markdown extension, prose with enough sentences,
/// recursive otherwise.
pub struct AutoChunker {
    recursive: RecursiveChunker,
    markdown: MarkdownChunker,
    code: CodeChunker,
    semantic: SemanticChunker,
}

impl AutoChunker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Result<Self, ChunkError> {
        Self::with_configs(
            RecursiveConfig::default(),
            MarkdownConfig::default(),
            CodeConfig::default(),
            SemanticConfig::default(),
            embedder,
        )
    }

    pub fn with_configs(
        recursive: RecursiveConfig,
        markdown: MarkdownConfig,
        code: CodeConfig,
        semantic: SemanticConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ChunkError> {
        Ok(Self {
            recursive: RecursiveChunker::new(recursive)?,
            markdown: MarkdownChunker::new(markdown)?,
            code: CodeChunker::new(code)?,
            semantic: SemanticChunker::new(semantic, embedder)?,
        })
    }

    fn select(&self, text: &str, ctx: &ChunkContext) -> &dyn Chunker {
        if let Some(extension) = ctx.extension() {
            if CODE_EXTENSIONS.contains(&extension.as_str()) {
                return &self.code;
            }
            if extension == "md" || extension == "markdown" {
                return &self.markdown;
            }
        }
        if sentence_terminators(text) >= SEMANTIC_SENTENCE_MINIMUM && !text.contains("```") {
            return &self.semantic;
        }
        &self.recursive
    }
}

#[async_trait]
impl Chunker for AutoChunker {
    fn strategy(&self) -> &'static str {
        "auto"
    }

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError> {
        self.select(text, ctx).chunk(text, ctx).await
    }
}

fn sentence_terminators(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|(idx, ch)| {
            matches!(ch, '.' | '!' | '?')
                && chars
                    .get(idx + 1)
                    .map(|next| next.is_whitespace())
                    .unwrap_or(true)
        })
        .count()
}
