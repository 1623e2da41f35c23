use async_trait::async_trait;
use atheneum_core::model::{Chunk, ChunkType};

use super::recursive::{RecursiveChunker, RecursiveConfig};
use super::{finalize, ChunkContext, ChunkDraft, ChunkError, Chunker};

/// Structure-aware splitter for markdown: sections are delimited by headers,
/// every chunk carries its ancestor-header path, and fenced code blocks and
/// tables stay whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkdownConfig {
    /// Maximum section size in characters before the recursive fallback kicks in.
    pub max_chunk_size: usize,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
        }
    }
}

pub struct MarkdownChunker {
    config: MarkdownConfig,
    fallback: RecursiveChunker,
}

impl MarkdownChunker {
    pub fn new(config: MarkdownConfig) -> Result<Self, ChunkError> {
        if config.max_chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        let fallback = RecursiveChunker::new(RecursiveConfig {
            chunk_size: config.max_chunk_size,
            chunk_overlap: 0,
        })?;
        Ok(Self { config, fallback })
    }
}

#[async_trait]
impl Chunker for MarkdownChunker {
    fn strategy(&self) -> &'static str {
        "markdown"
    }

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError> {
        let sections = parse_sections(text);
        let mut drafts: Vec<ChunkDraft> = Vec::new();

        for section in &sections {
            let content = section.lines.join("\n");
            if content.trim().is_empty() {
                continue;
            }

            if content.chars().count() <= self.config.max_chunk_size {
                drafts.push(section_draft(
                    content,
                    section,
                    Some(section.line_start),
                    Some(section.line_end),
                ));
                continue;
            }

            // Oversized section: pack its blocks, keeping fences and tables whole.
            let blocks = split_blocks(&section.lines, section.line_start);
            let mut pending: Vec<&Block> = Vec::new();
            let mut pending_len = 0usize;

            for block in &blocks {
                let block_len = block.text.chars().count();

                if block_len > self.config.max_chunk_size && !block.atomic {
                    flush_pending(&mut pending, &mut pending_len, section, &mut drafts);
                    for piece in self.fallback.split(&block.text) {
                        if piece.text.trim().is_empty() {
                            continue;
                        }
                        drafts.push(section_draft(
                            piece.text,
                            section,
                            Some(block.line_start),
                            Some(block.line_end),
                        ));
                    }
                    continue;
                }

                if pending_len + block_len > self.config.max_chunk_size && !pending.is_empty() {
                    flush_pending(&mut pending, &mut pending_len, section, &mut drafts);
                }
                pending_len += block_len;
                pending.push(block);
            }
            flush_pending(&mut pending, &mut pending_len, section, &mut drafts);
        }

        Ok(finalize(drafts, ctx, self.strategy()))
    }
}

struct Section {
    /// Header titles from the document root down to this section's own header.
    header_path: Vec<String>,
    lines: Vec<String>,
    line_start: usize,
    line_end: usize,
}

struct Block {
    text: String,
    atomic: bool,
    line_start: usize,
    line_end: usize,
}

fn flush_pending(
    pending: &mut Vec<&Block>,
    pending_len: &mut usize,
    section: &Section,
    drafts: &mut Vec<ChunkDraft>,
) {
    if pending.is_empty() {
        return;
    }
    let text = pending
        .iter()
        .map(|block| block.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let line_start = pending.first().map(|block| block.line_start);
    let line_end = pending.last().map(|block| block.line_end);
    drafts.push(section_draft(text, section, line_start, line_end));
    pending.clear();
    *pending_len = 0;
}

fn section_draft(
    text: String,
    section: &Section,
    line_start: Option<usize>,
    line_end: Option<usize>,
) -> ChunkDraft {
    let mut draft = ChunkDraft::text_block(text);
    draft.chunk_type = classify(&draft.text);
    draft.line_start = line_start;
    draft.line_end = line_end;
    if !section.header_path.is_empty() {
        if let Ok(path) = serde_json::to_string(&section.header_path) {
            draft.extra.insert("header_path".to_string(), path);
        }
    }
    draft
}

fn parse_sections(text: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current_lines: Vec<String> = Vec::new();
    let mut current_start = 1usize;
    let mut current_path: Vec<String> = Vec::new();
    let mut in_fence = false;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }

        let header = if in_fence { None } else { parse_header(line) };
        if let Some((level, title)) = header {
            if !current_lines.iter().all(|l| l.trim().is_empty()) {
                sections.push(Section {
                    header_path: current_path.clone(),
                    lines: std::mem::take(&mut current_lines),
                    line_start: current_start,
                    line_end: line_no - 1,
                });
            } else {
                current_lines.clear();
            }

            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, title));
            current_path = stack.iter().map(|(_, title)| title.clone()).collect();
            current_start = line_no;
            current_lines.push(line.to_string());
        } else {
            current_lines.push(line.to_string());
        }
    }

    if !current_lines.iter().all(|l| l.trim().is_empty()) {
        sections.push(Section {
            header_path: current_path,
            lines: current_lines,
            line_start: current_start,
            line_end: lines.len(),
        });
    }

    sections
}

fn parse_header(line: &str) -> Option<(u8, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|ch| *ch == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes as u8, rest.trim().to_string()))
}

fn split_blocks(lines: &[String], first_line_no: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let line = &lines[idx];
        let line_no = first_line_no + idx;

        if line.trim().is_empty() {
            idx += 1;
            continue;
        }

        if line.trim_start().starts_with("```") {
            let start = idx;
            idx += 1;
            while idx < lines.len() && !lines[idx].trim_start().starts_with("```") {
                idx += 1;
            }
            if idx < lines.len() {
                idx += 1; // include the closing fence
            }
            blocks.push(Block {
                text: lines[start..idx].join("\n"),
                atomic: true,
                line_start: line_no,
                line_end: first_line_no + idx - 1,
            });
            continue;
        }

        if line.trim_start().starts_with('|') {
            let start = idx;
            while idx < lines.len() && lines[idx].trim_start().starts_with('|') {
                idx += 1;
            }
            blocks.push(Block {
                text: lines[start..idx].join("\n"),
                atomic: true,
                line_start: line_no,
                line_end: first_line_no + idx - 1,
            });
            continue;
        }

        let start = idx;
        while idx < lines.len()
            && !lines[idx].trim().is_empty()
            && !lines[idx].trim_start().starts_with("```")
            && !lines[idx].trim_start().starts_with('|')
        {
            idx += 1;
        }
        blocks.push(Block {
            text: lines[start..idx].join("\n"),
            atomic: false,
            line_start: line_no,
            line_end: first_line_no + idx - 1,
        });
    }

    blocks
}

fn classify(text: &str) -> ChunkType {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        return ChunkType::Code;
    }

    let content_lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if content_lines.is_empty() {
        return ChunkType::Text;
    }
    if content_lines.len() == 1 && content_lines[0].starts_with('#') {
        return ChunkType::Header;
    }

    let list_lines = content_lines
        .iter()
        .filter(|line| is_list_item(line))
        .count();
    if list_lines * 2 > content_lines.len() {
        return ChunkType::List;
    }
    ChunkType::Text
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(|ch| ch.is_ascii_digit()).count();
    digits > 0 && line[digits..].starts_with(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> MarkdownChunker {
        MarkdownChunker::new(MarkdownConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn sections_carry_header_paths() {
        let text = "# Guide\n\nIntro text.\n\n## Setup\n\nSetup text.\n\n### Linux\n\nLinux text.\n\n## Usage\n\nUsage text.";
        let chunks = chunker()
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        let paths: Vec<Option<String>> = chunks
            .iter()
            .map(|chunk| chunk.metadata.extra.get("header_path").cloned())
            .collect();

        assert_eq!(paths[0].as_deref(), Some("[\"Guide\"]"));
        assert_eq!(paths[1].as_deref(), Some("[\"Guide\",\"Setup\"]"));
        assert_eq!(
            paths[2].as_deref(),
            Some("[\"Guide\",\"Setup\",\"Linux\"]")
        );
        // "Usage" is back at level 2: "Linux" must be popped off the path.
        assert_eq!(paths[3].as_deref(), Some("[\"Guide\",\"Usage\"]"));
    }

    #[tokio::test]
    async fn preamble_before_first_header_has_empty_path() {
        let text = "Leading prose.\n\n# Title\n\nBody.";
        let chunks = chunker()
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert!(chunks[0].metadata.extra.get("header_path").is_none());
        assert!(chunks[1].metadata.extra.get("header_path").is_some());
    }

    #[tokio::test]
    async fn oversized_section_falls_back_without_splitting_fences() {
        let prose = "A sentence of filler. ".repeat(30);
        let fence = format!("```\n{}\n```", "code_line();\n".repeat(20));
        let text = format!("# Big\n\n{}\n\n{}\n\n{}", prose, fence, prose);
        let chunker = MarkdownChunker::new(MarkdownConfig {
            max_chunk_size: 400,
        })
        .unwrap();

        let chunks = chunker
            .chunk(&text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert!(chunks.len() > 1);
        let fence_chunks: Vec<_> = chunks
            .iter()
            .filter(|chunk| chunk.text.contains("```"))
            .collect();
        assert_eq!(fence_chunks.len(), 1);
        assert_eq!(fence_chunks[0].metadata.chunk_type, ChunkType::Code);
        for chunk in &chunks {
            assert_eq!(
                chunk.metadata.extra.get("header_path").map(String::as_str),
                Some("[\"Big\"]")
            );
        }
    }

    #[tokio::test]
    async fn tables_stay_whole() {
        let filler = "Filler sentence here. ".repeat(20);
        let table = "| a | b |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |";
        let text = format!("# T\n\n{}\n\n{}\n\n{}", filler, table, filler);
        let chunker = MarkdownChunker::new(MarkdownConfig {
            max_chunk_size: 300,
        })
        .unwrap();

        let chunks = chunker
            .chunk(&text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        let table_chunks: Vec<_> = chunks
            .iter()
            .filter(|chunk| chunk.text.contains("|---|"))
            .collect();
        assert_eq!(table_chunks.len(), 1);
        assert!(table_chunks[0].text.contains("| 3 | 4 |"));
    }

    #[tokio::test]
    async fn list_sections_are_typed_as_lists() {
        let text = "# L\n\n- one\n- two\n- three";
        let chunks = chunker()
            .chunk(text, &ChunkContext::new("d1"))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::List);
    }

    #[test]
    fn header_parsing_requires_space_after_hashes() {
        assert_eq!(parse_header("## Title"), Some((2, "Title".to_string())));
        assert_eq!(parse_header("##Title"), None);
        assert_eq!(parse_header("####### Too deep"), None);
    }
}
