//! Conversation embeddings for semantic and hybrid retrieval.
//!
//! An [`EmbeddingProvider`] turns conversation text into fixed-size vectors.
//! Two remote providers are supported, selected by `embedding.provider`:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `openai` | `POST {url}/embeddings`, bearer `OPENAI_API_KEY` |
//! | `ollama` | `POST {url}/api/embed` |
//!
//! Requests go through [`RetryPolicy`] with `embedding.max_retries`.
//! Vectors are stored as little-endian `f32` BLOBs and compared with
//! cosine similarity.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::retry::{should_retry_status, RetryPolicy};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored next to each vector.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts`, rejecting responses with the wrong count or dimensionality.
pub async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let vectors = provider.embed(texts).await?;
    if vectors.len() != texts.len() {
        bail!(
            "{} returned {} vectors for {} texts",
            provider.model_name(),
            vectors.len(),
            texts.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        bail!(
            "{} returned a {}-dimensional vector, expected {}",
            provider.model_name(),
            bad.len(),
            provider.dims()
        );
    }
    Ok(vectors)
}

pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    embed_checked(provider, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("empty embedding response"))
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::from_env(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "disabled" => bail!("embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// A failed HTTP exchange, tagged with whether another attempt may help.
#[derive(Debug)]
struct Failure {
    retryable: bool,
    message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// HTTP client plus retry policy shared by both providers.
struct JsonClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl JsonClient {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.retry
            .run(
                |failure: &Failure| failure.retryable,
                move |_| async move {
                    let mut request = self.http.post(url).json(body);
                    if let Some(key) = bearer {
                        request = request.bearer_auth(key);
                    }

                    let response = request.send().await.map_err(|e| Failure {
                        retryable: true,
                        message: format!("request to {} failed: {}", url, e),
                    })?;

                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(Failure {
                            retryable: should_retry_status(status.as_u16()),
                            message: format!("{} returned {}: {}", url, status, text.trim()),
                        });
                    }

                    response.json::<T>().await.map_err(|e| Failure {
                        retryable: false,
                        message: format!("unreadable response from {}: {}", url, e),
                    })
                },
            )
            .await
            .map_err(|failure| anyhow!(failure.message))
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model is required for provider '{}'", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims is required for provider '{}'", config.provider))?;
    Ok((model, dims))
}

fn base_url(config: &EmbeddingConfig, default: &str) -> String {
    config
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIProvider {
    client: JsonClient,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    /// Create a provider with the key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        Ok(Self {
            client: JsonClient::new(config)?,
            api_key,
            url: format!("{}/embeddings", base_url(config, DEFAULT_OPENAI_URL)),
            model,
            dims,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client.retry = retry;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response: OpenAIResponse = self
            .client
            .post(&self.url, Some(&self.api_key), &body)
            .await?;

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Local Ollama instance (`embedding.url`, default `http://localhost:11434`).
pub struct OllamaProvider {
    client: JsonClient,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config)?;
        Ok(Self {
            client: JsonClient::new(config)?,
            url: format!("{}/api/embed", base_url(config, DEFAULT_OLLAMA_URL)),
            model,
            dims,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client.retry = retry;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response: OllamaResponse = self.client.post(&self.url, None, &body).await?;
        Ok(response.embeddings)
    }
}

/// Encode a vector as little-endian `f32` bytes.
///
/// ```rust
/// use persona_harness::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.25];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a stored vector. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; `0.0` for empty, mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config(provider: &str, url: &str, dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some("test-embed".to_string()),
            dims: Some(dims),
            url: Some(url.to_string()),
            max_retries: 2,
            timeout_secs: 5,
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy::new(2).with_base_delay(Duration::ZERO)
    }

    #[test]
    fn test_cosine_similarity() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_disabled_and_incomplete_configs_rejected() {
        assert!(create_provider(&EmbeddingConfig::default()).is_err());

        let mut missing_dims = config("ollama", "http://localhost:1", 3);
        missing_dims.dims = None;
        assert!(create_provider(&missing_dims).is_err());
    }

    #[tokio::test]
    async fn test_openai_orders_by_index() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            }));
        });

        let cfg = config("openai", &format!("{}/v1", server.base_url()), 2);
        let provider = OpenAIProvider::new(&cfg, "sk-test".to_string()).unwrap();
        let texts = vec!["first".to_string(), "second".to_string()];
        let vectors = embed_checked(&provider, &texts).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_ollama_retries_server_errors_then_gives_up() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(503).body("loading model");
        });

        let provider = OllamaProvider::new(&config("ollama", &server.base_url(), 2))
            .unwrap()
            .with_retry_policy(no_wait());
        let err = embed_query(&provider, "hello").await.unwrap_err();

        assert!(err.to_string().contains("503"));
        mock.assert_calls(3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(404).body("model not found");
        });

        let provider = OllamaProvider::new(&config("ollama", &server.base_url(), 2))
            .unwrap()
            .with_retry_policy(no_wait());
        assert!(embed_query(&provider, "hello").await.is_err());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200)
                .json_body(serde_json::json!({"embeddings": [[0.1, 0.2, 0.3]]}));
        });

        let provider = OllamaProvider::new(&config("ollama", &server.base_url(), 2)).unwrap();
        let err = embed_query(&provider, "hello").await.unwrap_err();
        assert!(err.to_string().contains("3-dimensional"));
    }
}
