//! Vector-index abstraction for few-shot examples and document passages.
//!
//! The [`VectorIndex`] trait covers the one operation the pipeline
//! needs: a ranked metadata query against a namespace, optionally
//! filtered. [`HttpIndex`] speaks the Pinecone-style `POST /query`
//! protocol; [`MemoryIndex`] is a brute-force cosine implementation for
//! tests and local runs.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;

/// One ranked match from the index.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Query a namespace for the `top_k` nearest vectors. `filter` is a
    /// metadata equality filter (e.g. `{"product_id": "p-1"}`).
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>>;
}

/// Client for a Pinecone-style HTTP vector index.
///
/// The API key is read from `PINECONE_API_KEY`.
pub struct HttpIndex {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.url required for http provider"))?;

        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow::anyhow!("PINECONE_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl VectorIndex for HttpIndex {
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>> {
        let mut body = serde_json::json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeValues": false,
            "includeMetadata": include_metadata,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.clone();
        }

        let response = self
            .client
            .post(format!("{}/query", self.url))
            .header("Api-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("vector index query failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("vector index error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let matches = json
            .get("matches")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(matches
            .into_iter()
            .map(|m| IndexMatch {
                score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                metadata: m.get("metadata").cloned().unwrap_or(serde_json::json!({})),
            })
            .collect())
    }
}

struct MemoryEntry {
    namespace: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// In-memory index for tests and local runs. Brute-force cosine ranking
/// with string-equality metadata filtering.
pub struct MemoryIndex {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, namespace: &str, vector: Vec<f32>, metadata: serde_json::Value) {
        self.entries.write().unwrap().push(MemoryEntry {
            namespace: namespace.to_string(),
            vector,
            metadata,
        });
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_matches(metadata: &serde_json::Value, filter: Option<&serde_json::Value>) -> bool {
    let Some(filter) = filter.and_then(|f| f.as_object()) else {
        return true;
    };
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>> {
        let entries = self.entries.read().unwrap();

        let mut scored: Vec<IndexMatch> = entries
            .iter()
            .filter(|e| e.namespace == namespace && filter_matches(&e.metadata, filter))
            .map(|e| IndexMatch {
                score: cosine_similarity(&e.vector, vector),
                metadata: if include_metadata {
                    e.metadata.clone()
                } else {
                    serde_json::json!({})
                },
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}
