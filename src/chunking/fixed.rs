//! Character-bounded splitting with overlap.

use super::{ChunkCounter, ChunkingError};
use crate::pipeline::config::FixedChunkConfig;
use crate::pipeline::results::Page;
use std::collections::VecDeque;

/// Splits on a separator and merges pieces up to `chunk_size` characters, carrying up to
/// `chunk_overlap` characters into the next chunk.
#[derive(Debug, Clone)]
pub struct FixedChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
}

impl FixedChunker {
    /// Validate parameters.
    pub fn new(config: &FixedChunkConfig) -> Result<Self, ChunkingError> {
        if config.chunk_size == 0 {
            return Err(ChunkingError::InvalidParameters(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ChunkingError::InvalidParameters(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separator: config.separator.clone(),
        })
    }

    /// Chunk every page, numbering chunks across the whole document.
    pub fn chunk_pages(&self, pages: &[Page]) -> Vec<Page> {
        let mut counter = ChunkCounter::default();
        let mut chunks = Vec::new();
        for page in pages {
            if char_len(&page.text) <= self.chunk_size {
                chunks.push(counter.chunk(page, page.text.clone()));
                continue;
            }
            for text in self.split_text(&page.text) {
                chunks.push(counter.chunk(page, text));
            }
        }
        chunks
    }

    /// Split one text into chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = if self.separator.is_empty() {
            char_windows(text, 1, 0)
        } else {
            text.split(self.separator.as_str())
                .filter(|piece| !piece.is_empty())
                .flat_map(|piece| {
                    if char_len(piece) > self.chunk_size {
                        char_windows(piece, self.chunk_size, self.chunk_overlap)
                    } else {
                        vec![piece]
                    }
                })
                .collect()
        };
        let separator = if self.separator.is_empty() {
            ""
        } else {
            self.separator.as_str()
        };
        self.merge(&pieces, separator)
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        let joined_len = |current: &VecDeque<&str>| {
            if current.is_empty() { 0 } else { separator_len }
        };

        for piece in pieces {
            let len = char_len(piece);
            if total + len + joined_len(&current) > self.chunk_size && !current.is_empty() {
                push_joined(&mut chunks, &current, separator);
                while total > self.chunk_overlap
                    || (total + len + joined_len(&current) > self.chunk_size && total > 0)
                {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if current.is_empty() { 0 } else { separator_len };
                }
            }
            total += len + joined_len(&current);
            current.push_back(piece);
        }
        push_joined(&mut chunks, &current, separator);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Windows of `size` characters advancing by `size - overlap`; the last window ends at the end
/// of the text.
fn char_windows(text: &str, size: usize, overlap: usize) -> Vec<&str> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = boundaries.len() - 1;
    let step = size - overlap;

    let mut windows = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        windows.push(&text[boundaries[start]..boundaries[end]]);
        if end == len {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::results::PageMetadata;

    fn chunker(size: usize, overlap: usize, separator: &str) -> FixedChunker {
        FixedChunker::new(&FixedChunkConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            separator: separator.into(),
        })
        .unwrap()
    }

    fn page(text: &str) -> Page {
        Page::new(
            text,
            PageMetadata {
                source: "kb/doc.txt".into(),
                page_number: 1,
                last_update_date: "2024-05-01 10:00:00.000000".into(),
            },
        )
    }

    #[test]
    fn long_page_without_separator_yields_overlapping_windows() {
        let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunker(300, 30, "\n").chunk_pages(&[page(&text)]);

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 300));
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .chars()
                .rev()
                .take(30)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(pair[1].text.starts_with(&tail));
        }
        let indices: Vec<_> = chunks.iter().map(|c| c.chunk_index.unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn short_pages_pass_through_unchanged() {
        let chunks = chunker(300, 30, "\n").chunk_pages(&[page("  short page  "), page("second")]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "  short page  ");
        assert_eq!(chunks[1].chunk_index, Some(1));
        assert_eq!(chunks[1].metadata.page_number, 1);
    }

    #[test]
    fn pieces_merge_up_to_chunk_size_with_overlap() {
        let chunks = chunker(10, 4, " ").split_text("aaa bbb ccc ddd eee");
        assert_eq!(chunks, vec!["aaa bbb", "bbb ccc", "ccc ddd", "ddd eee"]);
    }

    #[test]
    fn indices_continue_across_pages() {
        let long = "x".repeat(25);
        let chunks = chunker(10, 2, "\n").chunk_pages(&[page(&long), page(&long)]);
        let indices: Vec<_> = chunks.iter().map(|c| c.chunk_index.unwrap()).collect();
        assert_eq!(indices, (0..chunks.len() as u64).collect::<Vec<_>>());
        assert!(chunks.len() >= 6);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        for (size, overlap) in [(0, 0), (100, 100), (100, 150)] {
            let result = FixedChunker::new(&FixedChunkConfig {
                chunk_size: size,
                chunk_overlap: overlap,
                separator: "\n".into(),
            });
            assert!(matches!(result, Err(ChunkingError::InvalidParameters(_))));
        }
    }

    #[test]
    fn windows_respect_multibyte_characters() {
        let text = "é".repeat(25);
        let chunks = chunker(10, 2, "\n").split_text(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(chunks[0], "é".repeat(10));
    }
}
