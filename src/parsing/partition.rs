use super::{DocumentParser, DocumentSource, Element, ElementKind, ParseError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// Client for an Unstructured-compatible partitioning service
/// (`POST {base}/general/v0/general`, multipart `files` field).
pub struct PartitionClient {
    http: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PartitionedElement {
    #[serde(rename = "type")]
    kind: ElementKind,
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: PartitionMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct PartitionMetadata {
    page_number: Option<u32>,
}

impl PartitionClient {
    /// Build a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ParseError> {
        let http = Client::builder()
            .user_agent("docstage/parse")
            .build()
            .map_err(|error| ParseError::Partition(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/general/v0/general", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DocumentParser for PartitionClient {
    async fn partition(&self, source: &DocumentSource<'_>) -> Result<Vec<Element>, ParseError> {
        let file_name = source
            .key
            .rsplit('/')
            .next()
            .unwrap_or(source.key)
            .to_string();
        let form = Form::new().part(
            "files",
            Part::bytes(source.bytes.to_vec()).file_name(file_name),
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|error| {
                ParseError::Partition(format!("failed to reach {}: {error}", self.endpoint))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ParseError::Partition(format!(
                "partition service returned {status}: {body}"
            )));
        }

        let elements: Vec<PartitionedElement> = response.json().await.map_err(|error| {
            ParseError::Partition(format!("failed to decode partition response: {error}"))
        })?;

        tracing::debug!(key = source.key, elements = elements.len(), "Document partitioned");
        Ok(elements
            .into_iter()
            .map(|element| Element {
                kind: element.kind,
                text: element.text,
                page_number: element.metadata.page_number,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn elements_are_decoded_with_pages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/general/v0/general")
                    .body_contains("filename=\"report.pdf\"");
                then.status(200).json_body(json!([
                    { "type": "Header", "text": "Page header", "metadata": { "page_number": 1 } },
                    { "type": "Title", "text": "Summary", "metadata": { "page_number": 1 } },
                    { "type": "ListItem", "text": "point", "metadata": {} },
                    { "type": "NarrativeText", "text": "Body", "metadata": { "page_number": 2 } }
                ]));
            })
            .await;

        let client = PartitionClient::new(&server.base_url()).unwrap();
        let elements = client
            .partition(&DocumentSource {
                key: "kb/report.pdf",
                bytes: b"%PDF-1.7",
                last_update_date: "",
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(elements.len(), 4);
        assert_eq!(elements[0].kind, ElementKind::Header);
        assert_eq!(elements[2].kind, ElementKind::Other);
        assert_eq!(elements[2].page_number, None);
        assert_eq!(elements[3].page_number, Some(2));
    }

    #[tokio::test]
    async fn service_errors_are_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/general/v0/general");
                then.status(422).body("unsupported file");
            })
            .await;

        let client = PartitionClient::new(&server.base_url()).unwrap();
        let error = client
            .partition(&DocumentSource {
                key: "deck.pptx",
                bytes: b"PK",
                last_update_date: "",
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ParseError::Partition(message) if message.contains("422")));
    }
}
