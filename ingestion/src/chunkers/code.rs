use async_trait::async_trait;
use atheneum_core::model::{Chunk, ChunkType};
use regex::Regex;

use super::recursive::{RecursiveChunker, RecursiveConfig};
use super::{finalize, ChunkContext, ChunkDraft, ChunkError, Chunker};

/// Rough character budget per source line, used when an oversized definition
/// falls through to the recursive splitter.
const CHARS_PER_LINE_ESTIMATE: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeConfig {
    /// Maximum chunk size in lines.
    pub max_chunk_size: usize,
    /// Prepend the detected import/prelude region to every chunk.
    pub preserve_imports: bool,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 120,
            preserve_imports: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Language::Rust),
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" => Some(Language::Cpp),
            "rb" => Some(Language::Ruby),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Unknown => "unknown",
        }
    }
}

/// Splits source files at top-level definition boundaries, keeping the import
/// region attached to every chunk so each one stays independently readable.
pub struct CodeChunker {
    config: CodeConfig,
    fallback: RecursiveChunker,
    rust_boundary: Regex,
    python_boundary: Regex,
    js_boundary: Regex,
    go_boundary: Regex,
    java_boundary: Regex,
    c_boundary: Regex,
    ruby_boundary: Regex,
    generic_boundary: Regex,
}

impl CodeChunker {
    pub fn new(config: CodeConfig) -> Result<Self, ChunkError> {
        if config.max_chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        let fallback = RecursiveChunker::new(RecursiveConfig {
            chunk_size: config.max_chunk_size * CHARS_PER_LINE_ESTIMATE,
            chunk_overlap: 0,
        })?;

        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|err| ChunkError::InvalidConfig(format!("boundary pattern: {}", err)))
        };

        Ok(Self {
            config,
            fallback,
            rust_boundary: compile(
                r"^(pub(\([^)]*\))?\s+)?(async\s+)?(unsafe\s+)?(fn|struct|enum|trait|impl|mod|macro_rules!)\b",
            )?,
            python_boundary: compile(r"^(async\s+def|def|class)\b")?,
            js_boundary: compile(
                r"^(export\s+)?(default\s+)?(async\s+)?(function|class)\b|^(export\s+)?(const|let|var)\s+\w+\s*=",
            )?,
            go_boundary: compile(r"^(func|type)\b")?,
            java_boundary: compile(r"^(public|protected|private|abstract|final|class|interface|enum)\b")?,
            c_boundary: compile(r"^[A-Za-z_].*\)\s*\{?\s*$|^(struct|class|enum|union|typedef)\b")?,
            ruby_boundary: compile(r"^(def|class|module)\b")?,
            generic_boundary: compile(r"^(def|class|function|fn|func)\b|^\S.*\{\s*$")?,
        })
    }

    fn boundary_for(&self, language: Language) -> &Regex {
        match language {
            Language::Rust => &self.rust_boundary,
            Language::Python => &self.python_boundary,
            Language::JavaScript | Language::TypeScript => &self.js_boundary,
            Language::Go => &self.go_boundary,
            Language::Java => &self.java_boundary,
            Language::C | Language::Cpp => &self.c_boundary,
            Language::Ruby => &self.ruby_boundary,
            Language::Unknown => &self.generic_boundary,
        }
    }
}

#[async_trait]
impl Chunker for CodeChunker {
    fn strategy(&self) -> &'static str {
        "code"
    }

    async fn chunk(&self, text: &str, ctx: &ChunkContext) -> Result<Vec<Chunk>, ChunkError> {
        let language = detect_language(ctx.extension().as_deref(), text);
        let boundary = self.boundary_for(language);
        let lines: Vec<&str> = text.lines().collect();

        let mut prelude_end = 0usize;
        for line in &lines {
            if boundary.is_match(line) {
                break;
            }
            if line.trim().is_empty() || is_comment_line(line) || is_import_line(language, line) {
                prelude_end += 1;
            } else {
                break;
            }
        }

        let prelude: String = lines[..prelude_end]
            .join("\n")
            .trim_end()
            .to_string();

        // Top-level boundaries after the prelude.
        let mut boundaries: Vec<usize> = (prelude_end..lines.len())
            .filter(|idx| boundary.is_match(lines[*idx]))
            .collect();
        if boundaries.first() != Some(&prelude_end) && prelude_end < lines.len() {
            boundaries.insert(0, prelude_end);
        }

        let mut segments: Vec<(usize, usize)> = Vec::new();
        for (pos, start) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(pos + 1)
                .copied()
                .unwrap_or(lines.len());
            if *start < end {
                segments.push((*start, end));
            }
        }

        let mut drafts: Vec<ChunkDraft> = Vec::new();
        if segments.is_empty() {
            if !prelude.trim().is_empty() {
                drafts.push(self.code_draft(prelude.clone(), language, Some(1), Some(prelude_end)));
            }
            return Ok(finalize(drafts, ctx, self.strategy()));
        }

        // Greedily pack adjacent definitions up to the line budget.
        let mut pending_start: Option<usize> = None;
        let mut pending_end = 0usize;

        for (start, end) in segments {
            let segment_lines = end - start;

            if segment_lines > self.config.max_chunk_size {
                if let Some(packed_start) = pending_start.take() {
                    let text = lines[packed_start..pending_end].join("\n");
                    drafts.push(self.packed_draft(text, &prelude, language, packed_start, pending_end));
                }
                let segment_text = lines[start..end].join("\n");
                for piece in self.fallback.split(&segment_text) {
                    if piece.text.trim().is_empty() {
                        continue;
                    }
                    drafts.push(self.packed_draft(piece.text, &prelude, language, start, end));
                }
                continue;
            }

            match pending_start {
                Some(packed_start) if pending_end - packed_start + segment_lines
                    <= self.config.max_chunk_size =>
                {
                    pending_end = end;
                }
                Some(packed_start) => {
                    let text = lines[packed_start..pending_end].join("\n");
                    drafts.push(self.packed_draft(text, &prelude, language, packed_start, pending_end));
                    pending_start = Some(start);
                    pending_end = end;
                }
                None => {
                    pending_start = Some(start);
                    pending_end = end;
                }
            }
        }
        if let Some(packed_start) = pending_start {
            let text = lines[packed_start..pending_end].join("\n");
            drafts.push(self.packed_draft(text, &prelude, language, packed_start, pending_end));
        }

        Ok(finalize(drafts, ctx, self.strategy()))
    }
}

impl CodeChunker {
    fn packed_draft(
        &self,
        body: String,
        prelude: &str,
        language: Language,
        start_idx: usize,
        end_idx: usize,
    ) -> ChunkDraft {
        let text = if self.config.preserve_imports && !prelude.trim().is_empty() {
            format!("{}\n\n{}", prelude, body)
        } else {
            body
        };
        self.code_draft(text, language, Some(start_idx + 1), Some(end_idx))
    }

    fn code_draft(
        &self,
        text: String,
        language: Language,
        line_start: Option<usize>,
        line_end: Option<usize>,
    ) -> ChunkDraft {
        let mut draft = ChunkDraft::text_block(text);
        draft.chunk_type = ChunkType::Code;
        draft.line_start = line_start;
        draft.line_end = line_end;
        draft
            .extra
            .insert("language".to_string(), language.as_str().to_string());
        draft
    }
}

pub fn detect_language(extension: Option<&str>, text: &str) -> Language {
    if let Some(language) = extension.and_then(Language::from_extension) {
        return language;
    }

    if text.contains("#include") {
        return Language::C;
    }
    if text.contains("fn ") && (text.contains("let ") || text.contains("::")) {
        return Language::Rust;
    }
    if text.contains("package main") || (text.contains("func ") && text.contains("package ")) {
        return Language::Go;
    }
    if text.contains("def ") && text.contains(':') && !text.contains("end\n") {
        return Language::Python;
    }
    if text.contains("function ") || text.contains("=> ") || text.contains("const ") {
        return Language::JavaScript;
    }
    if text.contains("public class") || text.contains("private ") {
        return Language::Java;
    }
    Language::Unknown
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//")
        || trimmed.starts_with('#')
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
        || trimmed.starts_with("--")
}

fn is_import_line(language: Language, line: &str) -> bool {
    let trimmed = line.trim_start();
    match language {
        Language::Rust => trimmed.starts_with("use ") || trimmed.starts_with("extern crate"),
        Language::Python => trimmed.starts_with("import ") || trimmed.starts_with("from "),
        Language::JavaScript | Language::TypeScript => {
            trimmed.starts_with("import ") || trimmed.contains("require(")
        }
        Language::Go => trimmed.starts_with("import") || trimmed.starts_with("package "),
        Language::Java => trimmed.starts_with("import ") || trimmed.starts_with("package "),
        Language::C | Language::Cpp => {
            trimmed.starts_with("#include")
                || trimmed.starts_with("#define")
                || trimmed.starts_with("#pragma")
        }
        Language::Ruby => trimmed.starts_with("require"),
        Language::Unknown => {
            trimmed.starts_with("import ")
                || trimmed.starts_with("use ")
                || trimmed.starts_with("#include")
        }
    }
}
