//! Boundaries placed where the embedding distance between neighbouring sentences spikes.

use super::{ChunkCounter, ChunkingError};
use crate::embedding::{EmbeddingClient, embed_in_batches};
use crate::pipeline::config::{EmbedConfig, SemanticChunkConfig};
use crate::pipeline::results::Page;

struct Sentence<'a> {
    text: &'a str,
    page: usize,
}

/// Semantic chunker bound to the embedding client of the message's provider.
pub struct SemanticChunker<'a> {
    client: &'a dyn EmbeddingClient,
    embed: &'a EmbedConfig,
    batch_size: usize,
}

impl<'a> SemanticChunker<'a> {
    /// Use `client` with the model and dimension from `embed`.
    pub fn new(client: &'a dyn EmbeddingClient, embed: &'a EmbedConfig, batch_size: usize) -> Self {
        Self {
            client,
            embed,
            batch_size,
        }
    }

    /// Chunk all pages as one text stream.
    pub async fn chunk_pages(
        &self,
        pages: &[Page],
        config: &SemanticChunkConfig,
    ) -> Result<Vec<Page>, ChunkingError> {
        if !(0.0..=100.0).contains(&config.breakpoint_percentile) {
            return Err(ChunkingError::InvalidParameters(format!(
                "breakpoint_percentile must be within 0..=100, got {}",
                config.breakpoint_percentile
            )));
        }
        if config.max_chunk_chars == Some(0) {
            return Err(ChunkingError::InvalidParameters(
                "max_chunk_chars must be greater than zero".into(),
            ));
        }

        let sentences: Vec<Sentence<'_>> = pages
            .iter()
            .enumerate()
            .flat_map(|(page, p)| {
                split_sentences(&p.text)
                    .into_iter()
                    .map(move |text| Sentence { text, page })
            })
            .collect();
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let breaks = if sentences.len() > 1 {
            let windows = combine_windows(&sentences, config.buffer_size);
            let vectors = embed_in_batches(
                self.client,
                &self.embed.model,
                self.embed.dimension,
                &windows,
                self.batch_size,
            )
            .await?;
            let distances: Vec<f32> = vectors
                .windows(2)
                .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
                .collect();
            let threshold = percentile(&distances, config.breakpoint_percentile);
            distances.iter().map(|distance| *distance > threshold).collect()
        } else {
            Vec::new()
        };

        let mut counter = ChunkCounter::default();
        let mut chunks = Vec::new();
        let mut group: Vec<&Sentence<'_>> = Vec::new();
        let mut group_chars = 0usize;

        for (index, sentence) in sentences.iter().enumerate() {
            let len = sentence.text.chars().count();
            if let Some(limit) = config.max_chunk_chars
                && !group.is_empty()
                && group_chars + 1 + len > limit
            {
                chunks.push(emit(&mut counter, pages, &group));
                group.clear();
                group_chars = 0;
            }
            group_chars += if group.is_empty() { len } else { len + 1 };
            group.push(sentence);

            if breaks.get(index).copied().unwrap_or(false) {
                chunks.push(emit(&mut counter, pages, &group));
                group.clear();
                group_chars = 0;
            }
        }
        if !group.is_empty() {
            chunks.push(emit(&mut counter, pages, &group));
        }

        tracing::debug!(
            sentences = sentences.len(),
            chunks = chunks.len(),
            "Semantic chunking finished"
        );
        Ok(chunks)
    }
}

fn emit(counter: &mut ChunkCounter, pages: &[Page], group: &[&Sentence<'_>]) -> Page {
    let text = group
        .iter()
        .map(|sentence| sentence.text)
        .collect::<Vec<_>>()
        .join(" ");
    counter.chunk(&pages[group[0].page], text)
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        let terminal = matches!(ch, '.' | '!' | '?');
        if terminal && chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
            let end = offset + ch.len_utf8();
            sentences.push(text[start..end].trim());
            start = end;
        }
    }
    sentences.push(text[start..].trim());
    sentences.retain(|sentence| !sentence.is_empty());
    sentences
}

/// Each sentence joined with `buffer_size` neighbours on both sides.
fn combine_windows(sentences: &[Sentence<'_>], buffer_size: usize) -> Vec<String> {
    (0..sentences.len())
        .map(|index| {
            let start = index.saturating_sub(buffer_size);
            let end = (index + buffer_size + 1).min(sentences.len());
            sentences[start..end]
                .iter()
                .map(|sentence| sentence.text)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Linear-interpolated percentile of `values` (0-100).
fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return f32::INFINITY;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let rank = (pct / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClientError, EmbeddingRequest};
    use crate::pipeline::config::EmbeddingProviderKind;
    use crate::pipeline::results::PageMetadata;
    use async_trait::async_trait;

    /// Sentences about cats point one way, everything else the other.
    struct TopicClient;

    #[async_trait]
    impl EmbeddingClient for TopicClient {
        async fn generate_embeddings(
            &self,
            request: EmbeddingRequest<'_>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(request
                .texts
                .iter()
                .map(|text| {
                    let cats = text.matches("cat").count() as f32;
                    let other = text.split_whitespace().count() as f32 - cats;
                    vec![cats, other.max(0.0)]
                })
                .collect())
        }
    }

    fn embed_config() -> EmbedConfig {
        EmbedConfig {
            provider: EmbeddingProviderKind::Hash,
            model: "topic".into(),
            dimension: 2,
            batch_size: None,
        }
    }

    fn page(text: &str, page_number: u32) -> Page {
        Page::new(
            text,
            PageMetadata {
                source: "kb/essay.txt".into(),
                page_number,
                last_update_date: String::new(),
            },
        )
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        assert_eq!(
            split_sentences("One. Two!  Three? v1.2 stays"),
            vec!["One.", "Two!", "Three?", "v1.2 stays"]
        );
    }

    #[test]
    fn percentile_interpolates() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 50.0) - 2.0).abs() < 1e-6);
        assert!((percentile(&values, 95.0) - 3.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn topic_shift_becomes_boundary() {
        let pages = vec![
            page("cat cat cat. cat cat cat.", 1),
            page("dogs run fast. birds fly high.", 2),
        ];
        let config = SemanticChunkConfig {
            breakpoint_percentile: 50.0,
            buffer_size: 0,
            max_chunk_chars: None,
        };
        let embed = embed_config();
        let chunks = SemanticChunker::new(&TopicClient, &embed, 16)
            .chunk_pages(&pages, &config)
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "cat cat cat. cat cat cat.");
        assert_eq!(chunks[0].metadata.page_number, 1);
        assert_eq!(chunks[1].metadata.page_number, 2);
        assert_eq!(chunks[1].chunk_index, Some(1));
    }

    #[tokio::test]
    async fn max_chunk_chars_forces_breaks() {
        let pages = vec![page("cat one. cat two. cat three. cat four.", 1)];
        let config = SemanticChunkConfig {
            breakpoint_percentile: 100.0,
            buffer_size: 1,
            max_chunk_chars: Some(20),
        };
        let embed = embed_config();
        let chunks = SemanticChunker::new(&TopicClient, &embed, 16)
            .chunk_pages(&pages, &config)
            .await
            .unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 20));
        let indices: Vec<_> = chunks.iter().map(|c| c.chunk_index.unwrap()).collect();
        assert_eq!(indices, (0..chunks.len() as u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn out_of_range_percentile_is_rejected() {
        let embed = embed_config();
        let error = SemanticChunker::new(&TopicClient, &embed, 16)
            .chunk_pages(
                &[page("a. b.", 0)],
                &SemanticChunkConfig {
                    breakpoint_percentile: 120.0,
                    ..SemanticChunkConfig::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidParameters(_)));
    }
}
