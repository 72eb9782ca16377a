use super::{EmbeddingClient, EmbeddingClientError, EmbeddingRequest};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
}

impl OpenAiEmbeddingClient {
    /// Build a client authenticated with `api_key` against `base_url`.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, EmbeddingClientError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                EmbeddingClientError::ProviderUnavailable("invalid OpenAI API key".into())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .user_agent("docstage/embed")
            .default_headers(headers)
            .build()
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        request: EmbeddingRequest<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if request.texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&OpenAiRequest {
                model: request.model,
                input: request.texts,
            })
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::Transport(format!(
                    "failed to reach {}: {error}",
                    self.endpoint
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings request failed ({status}): {body}"
            )));
        }

        let mut parsed: OpenAiResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to parse embedding response: {error}"
            ))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn responses_are_reordered_by_index() {
        let server = MockServer::start_async().await;
        let client = OpenAiEmbeddingClient::new("sk-test", &server.url("/v1")).unwrap();

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({
                        "model": "text-embedding-3-small",
                        "input": ["first", "second"]
                    }));
                then.status(200).json_body(json!({
                    "data": [
                        { "embedding": [2.0, 2.0], "index": 1 },
                        { "embedding": [1.0, 1.0], "index": 0 }
                    ]
                }));
            })
            .await;

        let texts = vec!["first".to_string(), "second".to_string()];
        let vectors = client
            .generate_embeddings(EmbeddingRequest {
                model: "text-embedding-3-small",
                dimension: 2,
                texts: &texts,
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[tokio::test]
    async fn rate_limit_is_reported() {
        let server = MockServer::start_async().await;
        let client = OpenAiEmbeddingClient::new("sk-test", &server.base_url()).unwrap();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("slow down");
            })
            .await;

        let texts = vec!["x".to_string()];
        let error = client
            .generate_embeddings(EmbeddingRequest {
                model: "m",
                dimension: 2,
                texts: &texts,
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("429"));
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let client = OpenAiEmbeddingClient::new("sk-test", "http://127.0.0.1:9/v1").unwrap();
        let texts = vec!["x".to_string()];
        let error = client
            .generate_embeddings(EmbeddingRequest {
                model: "m",
                dimension: 2,
                texts: &texts,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::Transport(_)));
    }
}
