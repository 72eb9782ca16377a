//! Chunking strategies.
//!
//! Every strategy numbers its output with one counter shared across all pages of a document,
//! starting at zero.

pub mod fixed;
pub mod semantic;

pub use fixed::FixedChunker;
pub use semantic::SemanticChunker;

use crate::embedding::EmbeddingClientError;
use crate::pipeline::results::Page;
use thiserror::Error;

/// Errors raised while chunking.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Strategy parameters cannot be honoured.
    #[error("invalid chunking parameters: {0}")]
    InvalidParameters(String),
    /// Sentence embeddings for the semantic strategy failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
}

/// Hand out global chunk indices.
#[derive(Debug, Default)]
pub(crate) struct ChunkCounter(u64);

impl ChunkCounter {
    pub(crate) fn chunk(&mut self, page: &Page, text: impl Into<String>) -> Page {
        let chunk = page.to_chunk(text, self.0);
        self.0 += 1;
        chunk
    }
}

/// One chunk per page; rows of tabular data are already chunk-sized.
pub fn dataframe_chunks(pages: &[Page]) -> Vec<Page> {
    let mut counter = ChunkCounter::default();
    pages
        .iter()
        .map(|page| counter.chunk(page, page.text.clone()))
        .collect()
}
