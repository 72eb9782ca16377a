//! Stage result variants appended to a pipeline message as it advances.

use serde::{Deserialize, Serialize};

/// Provenance attached to every page and chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Object key of the source file.
    pub source: String,
    /// Page, slide or sheet index (0 for flat formats).
    pub page_number: u32,
    /// Source last-modified timestamp, microsecond precision.
    pub last_update_date: String,
}

/// A span of extracted text. Becomes a chunk once `chunk_index` is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Extracted text.
    pub text: String,
    /// Source provenance.
    pub metadata: PageMetadata,
    /// Global chunk position, present only after the chunk stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
}

impl Page {
    /// Build an unchunked page.
    pub fn new(text: impl Into<String>, metadata: PageMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
            chunk_index: None,
        }
    }

    /// Derive a chunk from this page carrying the same metadata.
    pub fn to_chunk(&self, text: impl Into<String>, chunk_index: u64) -> Self {
        Self {
            text: text.into(),
            metadata: self.metadata.clone(),
            chunk_index: Some(chunk_index),
        }
    }
}

/// Output of the ingestion step: where the raw file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResult {
    /// Object store key of the uploaded file.
    pub key: String,
}

/// Output of the parse stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Extracted pages in document order.
    pub pages: Vec<Page>,
}

/// Output of the chunk stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// Chunks with globally increasing `chunk_index`.
    pub chunks: Vec<Page>,
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// The chunk that was embedded.
    pub chunk: Page,
    /// Embedding vector of the configured dimension.
    pub vector: Vec<f32>,
}

/// Output of the embed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedResult {
    /// One entry per chunk, in chunk order.
    pub chunks: Vec<EmbeddedChunk>,
}

/// Outcome reported by the vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    /// Index the records were written to.
    pub index: String,
    /// Number of records upserted.
    pub upserted: usize,
}

/// Output of the store stage; terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResult {
    /// Store outcome.
    pub status: StoreStatus,
}

/// Tagged union of every stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageResult {
    /// Ingestion output.
    Source(SourceResult),
    /// Parse stage output.
    Parse(ParseResult),
    /// Chunk stage output.
    Chunk(ChunkResult),
    /// Embed stage output.
    Embed(EmbedResult),
    /// Store stage output.
    Store(StoreResult),
}

/// Discriminant of a [`StageResult`], ordered by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultKind {
    /// [`StageResult::Source`].
    Source,
    /// [`StageResult::Parse`].
    Parse,
    /// [`StageResult::Chunk`].
    Chunk,
    /// [`StageResult::Embed`].
    Embed,
    /// [`StageResult::Store`].
    Store,
}

impl ResultKind {
    /// The kind that must follow this one, `None` once stored.
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Source => Some(Self::Parse),
            Self::Parse => Some(Self::Chunk),
            Self::Chunk => Some(Self::Embed),
            Self::Embed => Some(Self::Store),
            Self::Store => None,
        }
    }

    /// Lowercase label used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Parse => "parse",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StageResult {
    /// Discriminant of this result.
    pub const fn kind(&self) -> ResultKind {
        match self {
            Self::Source(_) => ResultKind::Source,
            Self::Parse(_) => ResultKind::Parse,
            Self::Chunk(_) => ResultKind::Chunk,
            Self::Embed(_) => ResultKind::Embed,
            Self::Store(_) => ResultKind::Store,
        }
    }
}
