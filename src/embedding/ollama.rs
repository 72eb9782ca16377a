use super::{EmbeddingClient, EmbeddingClientError, EmbeddingRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Embedding client for a local Ollama runtime (`POST /api/embed`).
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
}

impl OllamaEmbeddingClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("docstage/embed")
            .build()
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        request: EmbeddingRequest<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let payload = json!({
            "model": request.model,
            "input": request.texts,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::Transport(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        Ok(body.embeddings)
    }
}
