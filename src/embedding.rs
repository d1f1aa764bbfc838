//! Text embedding client.

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// External embedding service: text in, fixed-dimension vector out.
///
/// Deterministic for a fixed model version and identical text. No retry
/// is performed here; retry policy belongs to the caller.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// HTTP client for an OpenAI-shape `/embeddings` endpoint.
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl HttpEmbeddingService {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if !status.is_success() {
            return Err(RetrievalError::Embedding(format!(
                "embedding endpoint error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| RetrievalError::Embedding(format!("malformed response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
    }
}
