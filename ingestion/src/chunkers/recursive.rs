use async_trait::async_trait;
use atheneum_core::model::Chunk;

use super::{finalize, ChunkContext, ChunkDraft, ChunkError, Chunker};

/// Character-based recursive splitter. Break preference per window:
/// paragraph (`\n\n`) > sentence (`. `, `! `, `? `) > word > fixed width.
/// Fenced code blocks are atomic; a window never ends inside one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecursiveConfig {
    /// Window size, measured in characters (Unicode scalar values).
    pub chunk_size: usize,
    /// Characters shared between consecutive windows; must be < `chunk_size`.
    pub chunk_overlap: usize,
}

impl Default for RecursiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl RecursiveConfig {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One split piece. `continues_previous` marks pieces whose first
/// `chunk_overlap` characters duplicate the tail of the piece before them.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub text: String,
    pub continues_previous: bool,
}

pub struct RecursiveChunker {
    config: RecursiveConfig,
}

impl RecursiveChunker {
    pub fn new(config: RecursiveConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RecursiveConfig {
        &self.config
    }

    pub(crate) fn split(&self, text: &str) -> Vec<Piece> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let protected = protected_ranges(&chars);
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut pieces: Vec<Piece> = Vec::new();
        let mut start = 0usize;
        let mut continues = false;

        while start < n {
            // A fenced block at the cursor is emitted whole, however long.
            if let Some(&(_, block_end)) = protected
                .iter()
                .find(|(block_start, block_end)| *block_start <= start && start < *block_end)
            {
                push_piece(&mut pieces, &chars[start..block_end], continues);
                start = block_end;
                continues = false;
                continue;
            }

            if n - start <= size {
                push_piece(&mut pieces, &chars[start..n], continues);
                break;
            }

            let limit = start + size;
            // A block straddling the limit caps the window at the block start.
            let fence_cap = protected
                .iter()
                .find(|(block_start, block_end)| {
                    *block_start > start && *block_start < limit && limit < *block_end
                })
                .map(|(block_start, _)| *block_start);
            let cap = fence_cap.unwrap_or(limit);

            if let Some(sep) = last_paragraph_break(&chars, &protected, start, cap) {
                push_piece(&mut pieces, &chars[start..sep], continues);
                start = sep;
                while start < n && (chars[start] == '\n' || chars[start] == '\r') {
                    start += 1;
                }
                continues = false;
                continue;
            }

            let soft_break = last_sentence_break(&chars, &protected, start, cap)
                .or_else(|| last_word_break(&chars, &protected, start, cap));

            match soft_break {
                Some(end) => {
                    push_piece(&mut pieces, &chars[start..end], continues);
                    let rewound = end.saturating_sub(overlap);
                    if rewound > start {
                        start = rewound;
                        continues = overlap > 0;
                    } else {
                        start = end;
                        continues = false;
                    }
                }
                None if fence_cap == Some(cap) => {
                    // Break at the fence edge; the block itself starts fresh.
                    push_piece(&mut pieces, &chars[start..cap], continues);
                    start = cap;
                    continues = false;
                }
                None => {
                    push_piece(&mut pieces, &chars[start..cap], continues);
                    let rewound = cap.saturating_sub(overlap);
                    if rewound > start {
                        start = rewound;
                        continues = overlap > 0;
                    } else {
                        start = cap;
                        continues = false;
                    }
                }
            }
        }

        pieces
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    fn strategy(&self) -> &'static str {
        "recursive"
    }

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError> {
        let ratio = self.config.chunk_overlap as f32 / self.config.chunk_size as f32;
        let drafts: Vec<ChunkDraft> = self
            .split(text)
            .into_iter()
            .filter(|piece| !piece.text.trim().is_empty())
            .map(|piece| {
                let mut draft = ChunkDraft::text_block(piece.text);
                draft.overlap_ratio = Some(ratio);
                draft
            })
            .collect();
        Ok(finalize(drafts, ctx, self.strategy()))
    }
}

fn push_piece(pieces: &mut Vec<Piece>, chars: &[char], continues: bool) {
    if chars.is_empty() {
        return;
    }
    pieces.push(Piece {
        text: chars.iter().collect(),
        continues_previous: continues,
    });
}

/// Inclusive fenced-block spans (``` ... ```); an unterminated fence runs to
/// the end of the text.
fn protected_ranges(chars: &[char]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    let mut idx = 0usize;
    while idx + 3 <= chars.len() {
        if chars[idx] == '`' && chars[idx + 1] == '`' && chars[idx + 2] == '`' {
            match open {
                None => open = Some(idx),
                Some(start) => {
                    ranges.push((start, idx + 3));
                    open = None;
                }
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }
    if let Some(start) = open {
        ranges.push((start, chars.len()));
    }
    ranges
}

fn inside_protected(protected: &[(usize, usize)], pos: usize) -> bool {
    protected
        .iter()
        .any(|(block_start, block_end)| *block_start < pos && pos < *block_end)
}

/// Position of the last `\n\n` separator whose chunk end fits in
/// `(start, cap]`; returns the index where the chunk should end.
fn last_paragraph_break(
    chars: &[char],
    protected: &[(usize, usize)],
    start: usize,
    cap: usize,
) -> Option<usize> {
    let upper = cap.min(chars.len().saturating_sub(1));
    for sep in (start + 1..upper).rev() {
        if chars[sep] == '\n'
            && chars[sep + 1] == '\n'
            && sep <= cap
            && !inside_protected(protected, sep)
            && !inside_protected(protected, sep + 1)
        {
            return Some(sep);
        }
    }
    None
}

/// End position after a sentence terminator plus space, within `(start, cap]`.
fn last_sentence_break(
    chars: &[char],
    protected: &[(usize, usize)],
    start: usize,
    cap: usize,
) -> Option<usize> {
    let upper = cap.min(chars.len());
    for end in (start + 2..=upper).rev() {
        let punct = chars[end - 2];
        if (punct == '.' || punct == '!' || punct == '?')
            && chars[end - 1] == ' '
            && !inside_protected(protected, end)
        {
            return Some(end);
        }
    }
    None
}

/// End position just after a whitespace character, within `(start, cap]`.
fn last_word_break(
    chars: &[char],
    protected: &[(usize, usize)],
    start: usize,
    cap: usize,
) -> Option<usize> {
    let upper = cap.min(chars.len());
    for end in (start + 2..=upper).rev() {
        if chars[end - 1].is_whitespace() && !inside_protected(protected, end) {
            return Some(end);
        }
    }
    None
}
