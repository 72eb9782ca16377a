use super::{EmbeddingClient, EmbeddingClientError, EmbeddingRequest};
use async_trait::async_trait;

/// Deterministic embedding client that folds text bytes into a normalized vector.
///
/// Needs no network and always returns vectors of the requested dimension, which makes it the
/// provider of choice for local runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbeddingClient;

impl HashEmbeddingClient {
    /// Construct a new deterministic embedding client instance.
    pub const fn new() -> Self {
        Self
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        // Position-weighted so that anagrams land on different vectors.
        for (idx, byte) in text.bytes().enumerate() {
            let slot = (idx.wrapping_mul(31) ^ usize::from(byte)) % dimension;
            embedding[slot] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        request: EmbeddingRequest<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if request.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(request
            .texts
            .iter()
            .map(|text| Self::encode(text, request.dimension))
            .collect())
    }
}
