//! Vector similarity retrieval.

use crate::error::RetrievalError;
use crate::types::RetrievedPassage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata filter passed through to the index verbatim.
pub type MetadataFilter = BTreeMap<String, serde_json::Value>;

/// External vector similarity index, scoped to a fixed namespace.
///
/// Results come back sorted by descending relevance score; ties keep the
/// index's native return order and are not re-sorted here. An empty
/// result is a valid, non-error outcome.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

/// HTTP client for a Pinecone-shape `/query` endpoint.
///
/// Passage text is carried in `metadata.text`; matches missing it are
/// dropped rather than surfaced as empty passages.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    filter: &'a MetadataFilter,
    namespace: &'a str,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryMatch {
    score: f32,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

impl HttpVectorIndex {
    pub fn new(endpoint: String, namespace: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            namespace,
            api_key,
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let mut request = self.client.post(&self.endpoint).json(&QueryRequest {
            vector,
            top_k,
            filter,
            namespace: &self.namespace,
            include_metadata: true,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        if !status.is_success() {
            return Err(RetrievalError::Index(format!(
                "index error {status}: {body}"
            )));
        }

        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| RetrievalError::Index(format!("malformed response: {e}")))?;

        let passages = parsed
            .matches
            .into_iter()
            .filter_map(|m| {
                let text = m.metadata.get("text")?.as_str()?.to_string();
                Some(RetrievedPassage {
                    text,
                    score: m.score,
                    metadata: m.metadata,
                })
            })
            .collect();
        Ok(passages)
    }
}
