//! Embedding provider abstraction and implementations.
//!
//! Two embedding backends exist side by side: the OpenAI-API provider
//! used for intent classification, and a remote inference-endpoint
//! provider used for retrieval queries, which may serve a different
//! model and dimensionality. [`create_embedder`] dispatches on the
//! `provider` field of either `[embedding]` table.
//!
//! Calls are single-attempt: a failed embedding fails the turn, and the
//! streaming layer reports it as the turn's terminal error.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Build the provider named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedding::new(config)?)),
        "endpoint" => Ok(Box::new(EndpointEmbedding::new(config)?)),
        "disabled" => Ok(Box::new(DisabledEmbedding)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// No-op provider used when an embedding table is not configured; any
/// attempt to embed fails with a descriptive error.
pub struct DisabledEmbedding;

#[async_trait]
impl EmbeddingClient for DisabledEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Embedding provider is disabled")
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// Provider for the OpenAI embeddings API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl OpenAiEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embedding API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding(
            json.get("data")
                .and_then(|d| d.get(0))
                .and_then(|item| item.get("embedding")),
        )
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Provider for a hosted inference endpoint that accepts
/// `{"inputs": <text>}` and returns the embedding as its first response
/// element. Used for retrieval-query embeddings. An optional bearer
/// token is read from `EMBED_ENDPOINT_TOKEN`.
pub struct EndpointEmbedding {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    model: String,
}

impl EndpointEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for endpoint provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            token: std::env::var("EMBED_ENDPOINT_TOKEN").ok(),
            model: config.model.clone().unwrap_or_else(|| "endpoint".to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingClient for EndpointEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "inputs": text }));

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .context("endpoint embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("endpoint embedding error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding(json.get(0))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_embedding(value: Option<&serde_json::Value>) -> Result<Vec<f32>> {
    let array = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing vector"))?;

    Ok(array
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
