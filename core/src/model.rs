use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A tenant: one isolated collection of documents, caches and API keys.
///
/// `project_id` and `collection_name` are immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub embedding_model: String,
    pub collection_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "embedding-default-v1";

impl Project {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        embedding_model: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let project_id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            project_id,
            name: name.into(),
            description: description.into(),
            embedding_model: embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL_ID.to_string()),
            collection_name: collection_name_for(project_id),
            created_at: now,
            updated_at: now,
            metadata,
        }
    }
}

pub fn collection_name_for(project_id: Uuid) -> String {
    format!("kb_{}", project_id.simple())
}

/// Mutable fields of a project. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.embedding_model.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub content: String,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            source_path: None,
            metadata: HashMap::new(),
            ingested_at: Utc::now(),
        }
    }

    pub fn with_source_path(mut self, source_path: impl Into<String>) -> Self {
        self.source_path = Some(source_path.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    #[default]
    Text,
    Code,
    Header,
    List,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Code => "code",
            ChunkType::Header => "header",
            ChunkType::List => "list",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ChunkType::Text),
            "code" => Some(ChunkType::Code),
            "header" => Some(ChunkType::Header),
            "list" => Some(ChunkType::List),
            _ => None,
        }
    }
}

/// Typed chunk metadata. Stored in backends as a flat string map, so the
/// struct round-trips through `to_map`/`from_map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_type: ChunkType,
    pub parent_doc_id: String,
    pub chunking_strategy: String,
    pub char_count: usize,
    pub word_count: usize,
    #[serde(default)]
    pub overlap_ratio: Option<f32>,
    #[serde(default)]
    pub line_start: Option<usize>,
    #[serde(default)]
    pub line_end: Option<usize>,
    /// Strategy-specific extras (e.g. markdown `header_path`, code `language`).
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl ChunkMetadata {
    pub fn new(parent_doc_id: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            chunk_index: 0,
            total_chunks: 0,
            chunk_type: ChunkType::Text,
            parent_doc_id: parent_doc_id.into(),
            chunking_strategy: strategy.into(),
            char_count: 0,
            word_count: 0,
            overlap_ratio: None,
            line_start: None,
            line_end: None,
            extra: HashMap::new(),
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("chunk_index".to_string(), self.chunk_index.to_string());
        map.insert("total_chunks".to_string(), self.total_chunks.to_string());
        map.insert(
            "chunk_type".to_string(),
            self.chunk_type.as_str().to_string(),
        );
        map.insert("parent_doc_id".to_string(), self.parent_doc_id.clone());
        map.insert(
            "chunking_strategy".to_string(),
            self.chunking_strategy.clone(),
        );
        map.insert("char_count".to_string(), self.char_count.to_string());
        map.insert("word_count".to_string(), self.word_count.to_string());
        if let Some(ratio) = self.overlap_ratio {
            map.insert("overlap_ratio".to_string(), ratio.to_string());
        }
        if let Some(line) = self.line_start {
            map.insert("line_start".to_string(), line.to_string());
        }
        if let Some(line) = self.line_end {
            map.insert("line_end".to_string(), line.to_string());
        }
        map
    }

    pub fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        let reserved = [
            "chunk_index",
            "total_chunks",
            "chunk_type",
            "parent_doc_id",
            "chunking_strategy",
            "char_count",
            "word_count",
            "overlap_ratio",
            "line_start",
            "line_end",
        ];
        let extra = map
            .iter()
            .filter(|(key, _)| !reserved.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            chunk_index: map.get("chunk_index")?.parse().ok()?,
            total_chunks: map.get("total_chunks")?.parse().ok()?,
            chunk_type: ChunkType::parse(map.get("chunk_type")?)?,
            parent_doc_id: map.get("parent_doc_id")?.clone(),
            chunking_strategy: map.get("chunking_strategy")?.clone(),
            char_count: map.get("char_count")?.parse().ok()?,
            word_count: map.get("word_count")?.parse().ok()?,
            overlap_ratio: map.get("overlap_ratio").and_then(|v| v.parse().ok()),
            line_start: map.get("line_start").and_then(|v| v.parse().ok()),
            line_end: map.get("line_end").and_then(|v| v.parse().ok()),
            extra,
        })
    }
}

/// A contiguous piece of a document, the unit of embedding and retrieval.
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            chunk_id: chunk_id_for(&metadata.parent_doc_id, metadata.chunk_index),
            text: text.into(),
            metadata,
        }
    }
}

pub fn chunk_id_for(parent_doc_id: &str, index: usize) -> String {
    format!("{}_chunk{}", parent_doc_id, index)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
