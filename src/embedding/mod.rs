//! Embedding providers and the batching helper shared by the embed stage and the semantic
//! chunker.

mod hash;
mod ollama;
mod openai;

pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::Config;
use crate::pipeline::config::{Discriminator, EmbeddingProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider is not configured in this deployment.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Request never produced a usable HTTP response.
    #[error("Embedding request failed: {0}")]
    Transport(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider returned a different number of vectors than inputs.
    #[error("Provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch {
        /// Inputs sent.
        expected: usize,
        /// Vectors received.
        actual: usize,
    },
    /// A vector did not have the declared dimensionality.
    #[error("Embedding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Position of the offending vector.
        index: usize,
        /// Declared dimension.
        expected: usize,
        /// Observed dimension.
        actual: usize,
    },
}

/// One embedding call.
#[derive(Debug, Clone)]
pub struct EmbeddingRequest<'a> {
    /// Model identifier passed to the provider.
    pub model: &'a str,
    /// Declared dimensionality of the model.
    pub dimension: usize,
    /// Texts to embed, in order.
    pub texts: &'a [String],
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        request: EmbeddingRequest<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Embedding clients available in this deployment, resolved per message by provider name.
#[derive(Clone, Default)]
pub struct EmbedderRegistry {
    clients: HashMap<EmbeddingProviderKind, Arc<dyn EmbeddingClient>>,
}

impl EmbedderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider the configuration enables. `hash` is always available.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingClientError> {
        let mut registry = Self::new();
        registry.register(EmbeddingProviderKind::Hash, Arc::new(HashEmbeddingClient::new()));

        if let Some(api_key) = config.openai_api_key.as_deref() {
            let client = OpenAiEmbeddingClient::new(api_key, &config.openai_base_url)?;
            registry.register(EmbeddingProviderKind::OpenAi, Arc::new(client));
        }
        if let Some(url) = config.ollama_url.as_deref() {
            let client = OllamaEmbeddingClient::new(url)?;
            registry.register(EmbeddingProviderKind::Ollama, Arc::new(client));
        }

        tracing::debug!(
            providers = ?registry.clients.keys().map(|kind| kind.as_str()).collect::<Vec<_>>(),
            "Embedding providers registered"
        );
        Ok(registry)
    }

    /// Add or replace a provider.
    pub fn register(&mut self, kind: EmbeddingProviderKind, client: Arc<dyn EmbeddingClient>) {
        self.clients.insert(kind, client);
    }

    /// Look up the client for a provider.
    pub fn resolve(
        &self,
        kind: EmbeddingProviderKind,
    ) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
        self.clients.get(&kind).cloned().ok_or_else(|| {
            EmbeddingClientError::ProviderUnavailable(format!(
                "provider '{}' is not configured",
                kind.as_str()
            ))
        })
    }
}

/// Embed `texts` in requests of at most `batch_size`, checking count and dimensionality of every
/// response. Vectors are never truncated or padded.
pub async fn embed_in_batches(
    client: &dyn EmbeddingClient,
    model: &str,
    dimension: usize,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if dimension == 0 {
        return Err(EmbeddingClientError::GenerationFailed(
            "embedding dimension must be greater than zero".into(),
        ));
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embeddings = client
            .generate_embeddings(EmbeddingRequest {
                model,
                dimension,
                texts: batch,
            })
            .await?;

        if embeddings.len() != batch.len() {
            return Err(EmbeddingClientError::CountMismatch {
                expected: batch.len(),
                actual: embeddings.len(),
            });
        }
        for (offset, vector) in embeddings.iter().enumerate() {
            if vector.len() != dimension {
                return Err(EmbeddingClientError::DimensionMismatch {
                    index: vectors.len() + offset,
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }
        vectors.extend(embeddings);
    }

    tracing::debug!(model, dimension, texts = texts.len(), "Embeddings generated");
    Ok(vectors)
}
