//! Embedding providers.
//!
//! A provider turns an ordered batch of sentences into an ordered batch of
//! equal-length vectors. The bundled [`OpenAIProvider`] talks to any server
//! implementing the OpenAI-compatible `/embeddings` endpoint (OpenAI itself,
//! text-embeddings-inference, Ollama, LM Studio, ...).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the model this handle encodes with.
    fn model(&self) -> &str;

    /// Embed a batch of texts.
    ///
    /// The output has one vector per input, in input order, and every
    /// vector has the same length.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut rows = self.embed_batch(&[text.to_string()]).await?;
        match (rows.pop(), rows.is_empty()) {
            (Some(row), true) => Ok(row),
            _ => Err(EmbeddingError::InvalidResponse(
                "expected exactly one embedding for the query".to_string(),
            )),
        }
    }
}

/// Default number of texts sent per HTTP request.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// OpenAI-compatible embedding provider.
pub struct OpenAIProvider {
    /// API key, sent as a bearer token when present.
    api_key: Option<String>,

    /// API base URL, without the trailing `/embeddings`.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name sent with every request.
    model: String,

    /// Maximum texts per request.
    batch_size: usize,
}

impl OpenAIProvider {
    /// Create a provider for `model` against the public OpenAI API.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set how many texts go into one request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn request_chunk(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "input": texts,
                "model": self.model,
            }));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let mut result: OpenAIEmbeddingResponse = response.json().await?;

        if result.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Servers may return rows out of order; `index` is authoritative.
        result.data.sort_by_key(|item| item.index);
        for (position, item) in result.data.iter().enumerate() {
            if item.index != position {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "missing embedding for input {position}"
                )));
            }
        }

        Ok(result.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.base_url.is_empty() {
            return Err(EmbeddingError::ProviderNotConfigured);
        }

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            embeddings.extend(self.request_chunk(chunk).await?);
        }

        if let Some(first) = embeddings.first() {
            let expected = first.len();
            if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        info!("Generated {} batch embeddings", embeddings.len());
        Ok(embeddings)
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_batch_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [0.0, 1.0], "index": 1 },
                    { "embedding": [1.0, 0.0], "index": 0 }
                ],
                "model": "mini"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini").with_base_url(server.uri());
        let rows = provider.embed_batch(&texts(&["a", "b"])).await.unwrap();

        assert_eq!(rows, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_embed_batch_splits_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "input": ["a", "b"], "model": "mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [1.0], "index": 0 },
                    { "embedding": [2.0], "index": 1 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "input": ["c"], "model": "mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [3.0], "index": 0 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini")
            .with_base_url(server.uri())
            .with_batch_size(2);
        let rows = provider.embed_batch(&texts(&["a", "b", "c"])).await.unwrap();

        assert_eq!(rows, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[tokio::test]
    async fn test_api_key_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.5, 0.5], "index": 0 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini")
            .with_base_url(server.uri())
            .with_api_key("secret");
        let query = provider.embed_query("hello").await.unwrap();

        assert_eq!(query, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini").with_base_url(server.uri());
        let err = provider.embed_batch(&texts(&["a"])).await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::RateLimited {
                retry_after_secs: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_row_count_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [1.0], "index": 0 }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini").with_base_url(server.uri());
        let err = provider.embed_batch(&texts(&["a", "b"])).await.unwrap_err();

        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_api_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("mini").with_base_url(server.uri());
        let err = provider.embed_batch(&texts(&["a"])).await.unwrap_err();

        assert!(matches!(err, EmbeddingError::ApiRequest(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let provider = OpenAIProvider::new("mini").with_base_url("http://127.0.0.1:9");
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
