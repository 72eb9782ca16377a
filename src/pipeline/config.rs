//! Per-message strategy selection carried inside every pipeline message.
//!
//! Each stage picks its strategy from a closed set of discriminators. The sets are enums so
//! that the routing table can be checked for completeness once, at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Closed set of strategy names for one stage.
pub trait Discriminator: Copy + Sized + 'static {
    /// Every value, used to validate routing completeness.
    const ALL: &'static [Self];

    /// Wire name of the value.
    fn as_str(&self) -> &'static str;

    /// Parse a wire name case-insensitively.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|value| value.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

/// Parser selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// Comma separated values, one page per row.
    Csv,
    /// Excel workbook, one page per row.
    Xlsx,
    /// Plain text.
    Txt,
    /// HTML document.
    Html,
    /// PDF document.
    Pdf,
    /// PowerPoint deck.
    Pptx,
    /// Word document.
    Docx,
}

impl Discriminator for ParserKind {
    const ALL: &'static [Self] = &[
        Self::Csv,
        Self::Xlsx,
        Self::Txt,
        Self::Html,
        Self::Pdf,
        Self::Pptx,
        Self::Docx,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Txt => "txt",
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Pptx => "pptx",
            Self::Docx => "docx",
        }
    }
}

impl ParserKind {
    /// Whether the parser emits one page per table row.
    pub const fn is_tabular(self) -> bool {
        matches!(self, Self::Csv | Self::Xlsx)
    }
}

/// Chunking strategy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategyKind {
    /// Character-bounded splitting with overlap.
    Fixed,
    /// One row per chunk.
    Dataframe,
    /// Embedding-distance boundaries.
    Semantic,
}

impl Discriminator for ChunkStrategyKind {
    const ALL: &'static [Self] = &[Self::Fixed, Self::Dataframe, Self::Semantic];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Dataframe => "dataframe",
            Self::Semantic => "semantic",
        }
    }
}

/// Embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic hashing embedder with no network dependency.
    Hash,
}

impl Discriminator for EmbeddingProviderKind {
    const ALL: &'static [Self] = &[Self::OpenAi, Self::Ollama, Self::Hash];

    fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Hash => "hash",
        }
    }
}

/// Vector store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreTargetKind {
    /// Qdrant over HTTP.
    Qdrant,
    /// Process-local store.
    Memory,
}

impl Discriminator for StoreTargetKind {
    const ALL: &'static [Self] = &[Self::Qdrant, Self::Memory];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Qdrant => "qdrant",
            Self::Memory => "memory",
        }
    }
}

/// Extension could not be mapped to a parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no parser registered for file extension '{extension}' (key '{key}')")]
pub struct UnsupportedExtension {
    /// Offending extension, lowercased; empty when the key has none.
    pub extension: String,
    /// Source key the extension came from.
    pub key: String,
}

fn default_title_chunk_size() -> usize {
    1000
}

/// Parse stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Character threshold for title-delimited segmentation of documents.
    #[serde(default = "default_title_chunk_size")]
    pub chunk_size: usize,
    /// Extension to parser overrides, consulted before the built-in mapping.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, ParserKind>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_title_chunk_size(),
            extensions: BTreeMap::new(),
        }
    }
}

impl ParseConfig {
    /// Resolve the parser for an object key from its extension.
    pub fn resolve_parser(&self, key: &str) -> Result<ParserKind, UnsupportedExtension> {
        let extension = Path::new(key)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        self.extensions
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(&extension))
            .map(|(_, kind)| *kind)
            .or_else(|| ParserKind::from_name(&extension).filter(|_| !extension.is_empty()))
            .ok_or_else(|| UnsupportedExtension {
                extension,
                key: key.to_string(),
            })
    }
}

/// Parameters for [`ChunkStrategyKind::Fixed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters repeated between consecutive chunks.
    pub chunk_overlap: usize,
    /// Preferred split point.
    pub separator: String,
}

/// Parameters for [`ChunkStrategyKind::Dataframe`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataframeChunkConfig {}

fn default_breakpoint_percentile() -> f32 {
    95.0
}

fn default_buffer_size() -> usize {
    1
}

/// Parameters for [`ChunkStrategyKind::Semantic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticChunkConfig {
    /// Distances above this percentile become chunk boundaries (0-100).
    #[serde(default = "default_breakpoint_percentile")]
    pub breakpoint_percentile: f32,
    /// Neighbouring sentences folded into each comparison window.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Optional hard cap on chunk length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_chars: Option<usize>,
}

impl Default for SemanticChunkConfig {
    fn default() -> Self {
        Self {
            breakpoint_percentile: default_breakpoint_percentile(),
            buffer_size: default_buffer_size(),
            max_chunk_chars: None,
        }
    }
}

/// Chunk strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChunkConfig {
    /// Fixed-size character chunks.
    Fixed(FixedChunkConfig),
    /// Rows pass through unchanged.
    Dataframe(DataframeChunkConfig),
    /// Embedding-distance boundaries.
    Semantic(SemanticChunkConfig),
}

impl ChunkConfig {
    /// Discriminator used for routing.
    pub const fn kind(&self) -> ChunkStrategyKind {
        match self {
            Self::Fixed(_) => ChunkStrategyKind::Fixed,
            Self::Dataframe(_) => ChunkStrategyKind::Dataframe,
            Self::Semantic(_) => ChunkStrategyKind::Semantic,
        }
    }
}

/// Embed stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Provider to call.
    pub provider: EmbeddingProviderKind,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Declared dimensionality of the model.
    pub dimension: usize,
    /// Optional per-message override of the request batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// Store stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to write to.
    pub target: StoreTargetKind,
    /// Index (collection) name.
    pub index_name: String,
}

/// Strategy selection for every stage of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Parse settings.
    #[serde(default)]
    pub parse: ParseConfig,
    /// Chunk strategy.
    pub chunk: ChunkConfig,
    /// Embedding settings.
    pub embed: EmbedConfig,
    /// Store settings.
    pub store: StoreConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_builtin_extensions_case_insensitively() {
        let config = ParseConfig::default();
        assert_eq!(config.resolve_parser("kb/a.PDF"), Ok(ParserKind::Pdf));
        assert_eq!(config.resolve_parser("kb/sheet.xlsx"), Ok(ParserKind::Xlsx));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = ParseConfig::default();
        config.extensions.insert("htm".into(), ParserKind::Html);
        config.extensions.insert("md".into(), ParserKind::Txt);
        assert_eq!(config.resolve_parser("notes/readme.md"), Ok(ParserKind::Txt));
        assert_eq!(config.resolve_parser("page.HTM"), Ok(ParserKind::Html));
    }

    #[test]
    fn unsupported_extension_is_reported() {
        let error = ParseConfig::default()
            .resolve_parser("kb/archive.rar")
            .unwrap_err();
        assert_eq!(error.extension, "rar");
        assert!(error.to_string().contains("rar"));

        let missing = ParseConfig::default().resolve_parser("kb/README").unwrap_err();
        assert_eq!(missing.extension, "");
    }

    #[test]
    fn chunk_config_is_tagged() {
        let config: ChunkConfig = serde_json::from_value(json!({
            "type": "fixed",
            "chunk_size": 300,
            "chunk_overlap": 30,
            "separator": "\n"
        }))
        .unwrap();
        assert_eq!(config.kind(), ChunkStrategyKind::Fixed);

        let semantic: ChunkConfig = serde_json::from_value(json!({ "type": "semantic" })).unwrap();
        match semantic {
            ChunkConfig::Semantic(params) => {
                assert_eq!(params.buffer_size, 1);
                assert!((params.breakpoint_percentile - 95.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn fixed_chunk_requires_parameters() {
        let result: Result<ChunkConfig, _> =
            serde_json::from_value(json!({ "type": "fixed", "chunk_size": 300 }));
        assert!(result.is_err());
    }

    #[test]
    fn discriminators_parse_by_name() {
        assert_eq!(
            EmbeddingProviderKind::from_name("OpenAI"),
            Some(EmbeddingProviderKind::OpenAi)
        );
        assert_eq!(StoreTargetKind::from_name("opensearch"), None);
        assert_eq!(ChunkStrategyKind::ALL.len(), 3);
    }
}
