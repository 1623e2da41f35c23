use async_trait::async_trait;
use atheneum_core::embedding::{cosine_similarity, Embedder};
use atheneum_core::model::Chunk;
use std::sync::Arc;

use super::{finalize, ChunkContext, ChunkDraft, ChunkError, Chunker};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticConfig {
    /// Adjacent sentences below this cosine similarity start a new chunk.
    pub similarity_threshold: f32,
    /// Minimum sentences per chunk.
    pub min_chunk_size: usize,
    /// Maximum sentences per chunk.
    pub max_chunk_size: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            min_chunk_size: 1,
            max_chunk_size: 8,
        }
    }
}

impl SemanticConfig {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ChunkError::InvalidConfig(format!(
                "similarity_threshold {} must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.min_chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "min_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_chunk_size < self.min_chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "max_chunk_size {} must be >= min_chunk_size {}",
                self.max_chunk_size, self.min_chunk_size
            )));
        }
        Ok(())
    }
}

/// Embedding-driven splitter: a boundary lands wherever adjacent sentences
/// stop being similar enough, within the configured sentence bounds.
pub struct SemanticChunker {
    config: SemanticConfig,
    embedder: Arc<dyn Embedder>,
}

impl SemanticChunker {
    pub fn new(config: SemanticConfig, embedder: Arc<dyn Embedder>) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config, embedder })
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    fn strategy(&self) -> &'static str {
        "semantic"
    }

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }
        if sentences.len() == 1 {
            let drafts = vec![ChunkDraft::text_block(text.trim().to_string())];
            return Ok(finalize(drafts, ctx, self.strategy()));
        }

        let embeddings = self.embedder.embed_batch(&sentences).await?;

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = vec![0];
        for idx in 1..sentences.len() {
            let similarity = cosine_similarity(&embeddings[idx - 1], &embeddings[idx]);
            let semantic_break = similarity < self.config.similarity_threshold
                && current.len() >= self.config.min_chunk_size;
            if semantic_break || current.len() >= self.config.max_chunk_size {
                groups.push(std::mem::take(&mut current));
            }
            current.push(idx);
        }
        // A trailing fragment below the minimum folds into the last chunk.
        if current.len() < self.config.min_chunk_size && !groups.is_empty() {
            groups.last_mut().unwrap().extend(current);
        } else {
            groups.push(current);
        }

        let drafts: Vec<ChunkDraft> = groups
            .into_iter()
            .map(|group| {
                let text = group
                    .iter()
                    .map(|idx| sentences[*idx].as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                ChunkDraft::text_block(text)
            })
            .collect();

        Ok(finalize(drafts, ctx, self.strategy()))
    }
}

/// Splits on sentence terminators followed by whitespace, and on newlines.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();

    for (idx, ch) in chars.iter().enumerate() {
        if *ch == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(*ch);
        if matches!(ch, '.' | '!' | '?') {
            let next = chars.get(idx + 1);
            if next.is_none() || next.is_some_and(|c| c.is_whitespace()) {
                push_sentence(&mut sentences, &mut current);
            }
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use atheneum_core::embedding::EmbedError;

    /// Maps sentences onto fixed topic axes so boundary positions are exact.
    struct TopicEmbedder;

    #[async_trait]
    impl Embedder for TopicEmbedder {
        fn model_id(&self) -> &str {
            "topic-v1"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("cat") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    fn chunker(config: SemanticConfig) -> SemanticChunker {
        SemanticChunker::new(config, Arc::new(TopicEmbedder)).unwrap()
    }

    #[tokio::test]
    async fn boundary_lands_on_topic_shift() {
        let text = "The cat sleeps. The cat eats. Markets fell today. Stocks dropped sharply.";
        let chunks = chunker(SemanticConfig::default())
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("cat sleeps"));
        assert!(chunks[0].text.contains("cat eats"));
        assert!(chunks[1].text.contains("Markets fell"));
        assert_eq!(chunks[0].metadata.chunking_strategy, "semantic");
    }

    #[tokio::test]
    async fn max_chunk_size_forces_a_boundary() {
        let text = "The cat one. The cat two. The cat three. The cat four.";
        let config = SemanticConfig {
            similarity_threshold: 0.5,
            min_chunk_size: 1,
            max_chunk_size: 2,
        };
        let chunks = chunker(config)
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.word_count, 6);
    }

    #[tokio::test]
    async fn trailing_fragment_merges_into_last_chunk() {
        // Boundary before the final sentence, but min_chunk_size is 2, so the
        // lone trailing sentence folds back into the previous chunk.
        let text = "The cat one. The cat two. The cat three. Markets fell.";
        let config = SemanticConfig {
            similarity_threshold: 0.5,
            min_chunk_size: 2,
            max_chunk_size: 8,
        };
        let chunks = chunker(config)
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Markets fell."));
    }

    #[tokio::test]
    async fn single_sentence_is_one_chunk() {
        let chunks = chunker(SemanticConfig::default())
            .chunk("Just one sentence here.", &ChunkContext::new("d1"))
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn sentence_splitting_handles_terminators_and_newlines() {
        let sentences = split_sentences("One two. Three four! Five?\nSix seven");
        assert_eq!(
            sentences,
            vec!["One two.", "Three four!", "Five?", "Six seven"]
        );
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let result = SemanticChunker::new(
            SemanticConfig {
                similarity_threshold: 1.5,
                min_chunk_size: 1,
                max_chunk_size: 4,
            },
            Arc::new(TopicEmbedder),
        );
        assert!(result.is_err());
    }
}
