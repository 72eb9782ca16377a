//! Parsers that turn raw uploads into pages.
//!
//! Tabular formats (csv, xlsx) emit one page per row. Document formats (txt, html and the
//! partitioned binary formats) emit a stream of typed [`Element`]s which
//! [`segment::segment_by_title`] folds into title-delimited pages.

mod html;
mod partition;
pub mod segment;
mod tabular;
mod text;

pub use html::HtmlParser;
pub use partition::PartitionClient;
pub use tabular::{CsvParser, XlsxParser};
pub use text::TextParser;

use crate::config::Config;
use crate::pipeline::config::{Discriminator, ParserKind};
use crate::pipeline::results::{Page, PageMetadata};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while extracting pages.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No parser is registered for the kind in this deployment.
    #[error("parser '{0}' is not available")]
    Unavailable(String),
    /// The document could not be decoded.
    #[error("failed to parse {key}: {reason}")]
    Malformed {
        /// Source key.
        key: String,
        /// Decoder message.
        reason: String,
    },
    /// The partitioning service failed.
    #[error("partitioning failed: {0}")]
    Partition(String),
}

impl ParseError {
    pub(crate) fn malformed(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Bytes of one upload plus the provenance copied into every page.
#[derive(Debug, Clone, Copy)]
pub struct DocumentSource<'a> {
    /// Object key.
    pub key: &'a str,
    /// File contents.
    pub bytes: &'a [u8],
    /// Formatted last-modified timestamp.
    pub last_update_date: &'a str,
}

impl DocumentSource<'_> {
    pub(crate) fn metadata(&self, page_number: u32) -> PageMetadata {
        PageMetadata {
            source: self.key.to_string(),
            page_number,
            last_update_date: self.last_update_date.to_string(),
        }
    }

    /// Page for one table row: `{"file": key, "data": {column: value}}`.
    pub(crate) fn row_page(&self, page_number: u32, row: Map<String, Value>) -> Page {
        let text = json!({ "file": self.key, "data": Value::Object(row) }).to_string();
        Page::new(text, self.metadata(page_number))
    }
}

/// Element category assigned during partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ElementKind {
    /// Section heading; starts a new section.
    Title,
    /// Running header; dropped before segmentation.
    Header,
    /// Body text.
    NarrativeText,
    /// Anything else the partitioner reports (list items, tables, footers).
    #[serde(other)]
    Other,
}

/// A typed span of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Category.
    pub kind: ElementKind,
    /// Text content.
    pub text: String,
    /// 1-based page number when the format has pages.
    pub page_number: Option<u32>,
}

impl Element {
    /// Element without page information.
    pub fn new(kind: ElementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            page_number: None,
        }
    }
}

/// Emits one page per table row.
pub trait TabularParser: Send + Sync {
    /// Parse every row of every sheet.
    fn parse_rows(&self, source: &DocumentSource<'_>) -> Result<Vec<Page>, ParseError>;
}

/// Emits typed elements for title segmentation.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Partition the document into elements in reading order.
    async fn partition(&self, source: &DocumentSource<'_>) -> Result<Vec<Element>, ParseError>;
}

/// A registered parser.
#[derive(Clone)]
pub enum ParserStrategy {
    /// Row-per-page parser.
    Tabular(Arc<dyn TabularParser>),
    /// Element parser followed by title segmentation.
    Document(Arc<dyn DocumentParser>),
}

/// Parsers available in this deployment, keyed by [`ParserKind`].
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<ParserKind, ParserStrategy>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in parsers; pdf, pptx and docx need `PARTITION_URL`.
    pub fn from_config(config: &Config) -> Result<Self, ParseError> {
        let mut registry = Self::new();
        registry.register(ParserKind::Csv, ParserStrategy::Tabular(Arc::new(CsvParser)));
        registry.register(ParserKind::Xlsx, ParserStrategy::Tabular(Arc::new(XlsxParser)));
        registry.register(ParserKind::Txt, ParserStrategy::Document(Arc::new(TextParser)));
        registry.register(ParserKind::Html, ParserStrategy::Document(Arc::new(HtmlParser::new())));

        if let Some(url) = config.partition_url.as_deref() {
            let client: Arc<dyn DocumentParser> = Arc::new(PartitionClient::new(url)?);
            for kind in [ParserKind::Pdf, ParserKind::Pptx, ParserKind::Docx] {
                registry.register(kind, ParserStrategy::Document(client.clone()));
            }
        }
        Ok(registry)
    }

    /// Add or replace a parser.
    pub fn register(&mut self, kind: ParserKind, strategy: ParserStrategy) {
        self.parsers.insert(kind, strategy);
    }

    /// Look up the parser for a kind.
    pub fn resolve(&self, kind: ParserKind) -> Result<&ParserStrategy, ParseError> {
        self.parsers
            .get(&kind)
            .ok_or_else(|| ParseError::Unavailable(kind.as_str().to_string()))
    }

    /// Parse `source` with the parser registered for `kind`.
    pub async fn parse(
        &self,
        kind: ParserKind,
        source: &DocumentSource<'_>,
        title_chunk_size: usize,
    ) -> Result<Vec<Page>, ParseError> {
        let pages = match self.resolve(kind)? {
            ParserStrategy::Tabular(parser) => parser.parse_rows(source)?,
            ParserStrategy::Document(parser) => {
                let elements = parser.partition(source).await?;
                segment::segment_by_title(elements, source, title_chunk_size)
            }
        };
        tracing::debug!(
            key = source.key,
            parser = kind.as_str(),
            pages = pages.len(),
            "Document parsed"
        );
        Ok(pages)
    }
}
