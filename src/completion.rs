//! Chat-completion client abstraction.
//!
//! [`ChatModel`] is the seam between the pipeline and the language
//! model: `complete` returns a whole message (optionally constrained to
//! a JSON schema, which is how the classifier gets structured output),
//! and `stream` returns the lazy, forward-only token sequence the relay
//! consumes. [`OpenAiChat`] implements the trait against an
//! OpenAI-compatible API; tests substitute scripted fakes.
//!
//! Every call is a single attempt — failures propagate to the caller,
//! which converts them into the turn's one terminal error event.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};

use crate::config::ChatConfig;

/// A lazy, single-pass sequence of content increments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// User-message content: plain text or the ordered fragment list built
/// by the grounded strategy.
#[derive(Debug, Clone)]
pub enum UserContent {
    Text(String),
    Fragments(Vec<String>),
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: UserContent,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Schema name and JSON Schema body for structured output.
    pub response_schema: Option<(String, serde_json::Value)>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Request a full completion and return the message content.
    async fn complete(&self, req: ChatRequest) -> Result<String>;

    /// Request a streaming completion and return the token sequence.
    async fn stream(&self, req: ChatRequest) -> Result<TokenStream>;
}

/// Client for an OpenAI-compatible chat completions API.
///
/// Reads the API key from `OPENAI_API_KEY`; the base URL, models, and
/// timeout come from `[chat]` configuration.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
        })
    }

    fn request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
        let user_content = match &req.user {
            UserContent::Text(text) => serde_json::Value::String(text.clone()),
            UserContent::Fragments(fragments) => serde_json::Value::Array(
                fragments
                    .iter()
                    .map(|f| serde_json::json!({ "type": "text", "text": f }))
                    .collect(),
            ),
        };

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": user_content },
            ],
            "temperature": req.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some((name, schema)) = &req.response_schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("completion API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, req: ChatRequest) -> Result<String> {
        let body = Self::request_body(&req, false);
        let response = self.send(&body).await?;
        let json: serde_json::Value = response.json().await?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("completion response missing message content"))
    }

    async fn stream(&self, req: ChatRequest) -> Result<TokenStream> {
        let body = Self::request_body(&req, true);
        let response = self.send(&body).await?;
        Ok(sse_token_stream(response.bytes_stream()))
    }
}

/// Decode an SSE byte stream into content increments.
///
/// Frames are `data: <json>` blocks separated by blank lines; the
/// terminator frame is `data: [DONE]`. Each decoded increment is the
/// `choices[0].delta.content` of one frame; frames without content
/// (role preludes, finish markers) are skipped.
pub fn sse_token_stream<S>(bytes: S) -> TokenStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    let decoder = SseDecoder::new(bytes);
    Box::pin(futures::stream::try_unfold(decoder, |mut decoder| async move {
        match decoder.next_content().await? {
            Some(content) => Ok(Some((content, decoder))),
            None => Ok(None),
        }
    }))
}

struct SseDecoder<S> {
    inner: S,
    buffer: String,
    done: bool,
}

impl<S> SseDecoder<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin,
{
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: String::new(),
            done: false,
        }
    }

    /// Next content increment, or `None` when the stream is finished.
    async fn next_content(&mut self) -> Result<Option<String>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(frame) = self.take_frame() {
                match parse_frame(&frame)? {
                    FrameData::Content(content) => return Ok(Some(content)),
                    FrameData::Done => {
                        self.done = true;
                        return Ok(None);
                    }
                    FrameData::Skip => continue,
                }
            }

            match self.inner.next().await {
                Some(chunk) => {
                    let chunk = chunk.context("error reading completion stream")?;
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                // Upstream closed without [DONE]; treat as exhaustion.
                None => return Ok(None),
            }
        }
    }

    /// Split one complete frame off the front of the buffer.
    fn take_frame(&mut self) -> Option<String> {
        let boundary = self.buffer.find("\n\n")?;
        let frame = self.buffer[..boundary].to_string();
        self.buffer.drain(..boundary + 2);
        Some(frame)
    }
}

enum FrameData {
    Content(String),
    Done,
    Skip,
}

fn parse_frame(frame: &str) -> Result<FrameData> {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();

        if data == "[DONE]" {
            return Ok(FrameData::Done);
        }

        let json: serde_json::Value =
            serde_json::from_str(data).context("malformed completion stream frame")?;
        if let Some(content) = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            return Ok(FrameData::Content(content.to_string()));
        }
        return Ok(FrameData::Skip);
    }
    Ok(FrameData::Skip)
}
