//! Streaming transport and conversation-state access.
//!
//! The pipeline touches the outside world through two narrow seams:
//! [`EventSink`] appends ordered [`StreamEvent`]s to a per-conversation
//! channel, and [`ContextStore`] reads the per-user conversation context
//! once per turn. [`RedisTransport`] implements both against Redis
//! (stream key `{prefix}_{chat_id}_response`, string key
//! `{prefix}_{user_id}_context`) and also consumes the pub/sub control
//! channel `{prefix}_{topic}` that announces inbound turns. In-memory
//! doubles back the tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RedisConfig;
use crate::models::ConversationContext;

/// One event on a conversation's response channel.
///
/// Serialized wire shape: `{"type": "stream"|"ended"|"error",
/// "chat_id": ..., "data"?: ..., "status"?: ...}`. A turn emits zero or
/// more `stream` events followed by exactly one terminal `ended` or
/// `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Stream { chat_id: String, data: String },
    Ended { chat_id: String, status: String },
    Error { chat_id: String, status: String },
}

impl StreamEvent {
    pub fn stream(chat_id: &str, data: &str) -> Self {
        Self::Stream {
            chat_id: chat_id.to_string(),
            data: data.to_string(),
        }
    }

    pub fn ended(chat_id: &str, status: &str) -> Self {
        Self::Ended {
            chat_id: chat_id.to_string(),
            status: status.to_string(),
        }
    }

    pub fn error(chat_id: &str, status: &str) -> Self {
        Self::Error {
            chat_id: chat_id.to_string(),
            status: status.to_string(),
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::Stream { chat_id, .. }
            | Self::Ended { chat_id, .. }
            | Self::Error { chat_id, .. } => chat_id,
        }
    }

    /// Whether this event terminates the turn's event sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// Field pairs for stream-entry encoding (XADD).
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Stream { chat_id, data } => vec![
                ("type", "stream".to_string()),
                ("chat_id", chat_id.clone()),
                ("data", data.clone()),
            ],
            Self::Ended { chat_id, status } => vec![
                ("type", "ended".to_string()),
                ("chat_id", chat_id.clone()),
                ("status", status.clone()),
            ],
            Self::Error { chat_id, status } => vec![
                ("type", "error".to_string()),
                ("chat_id", chat_id.clone()),
                ("status", status.clone()),
            ],
        }
    }
}

/// Append-only per-conversation event channel.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &StreamEvent) -> Result<()>;
}

/// Read access to the externally-owned conversation context.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<ConversationContext>>;
}

/// An inbound turn-start notification from the control channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnNotification {
    pub query: String,
    #[serde(alias = "adviser_id")]
    pub user_id: String,
    pub chat_id: String,
}

/// Redis-backed transport. One multiplexed connection manager serves
/// all stream appends and context reads; pub/sub uses its own
/// connection as the protocol requires.
pub struct RedisTransport {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    prefix: String,
    topic: String,
}

impl RedisTransport {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url: {}", config.url))?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        info!(url = %config.url, "connected to redis");

        Ok(Self {
            client,
            manager,
            prefix: config.prefix.clone(),
            topic: config.topic.clone(),
        })
    }

    fn response_key(&self, chat_id: &str) -> String {
        format!("{}_{}_response", self.prefix, chat_id)
    }

    fn context_key(&self, user_id: &str) -> String {
        format!("{}_{}_context", self.prefix, user_id)
    }

    pub fn control_channel(&self) -> String {
        format!("{}_{}", self.prefix, self.topic)
    }

    /// Subscribe to the control channel and invoke `handler` for each
    /// well-formed turn notification. Malformed payloads are logged and
    /// skipped. Runs until the connection drops.
    pub async fn run_control_loop<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(TurnNotification) -> Fut,
        Fut: Future<Output = ()>,
    {
        let channel = self.control_channel();
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pub/sub connection")?;
        pubsub.subscribe(&channel).await?;
        info!(channel = %channel, "subscribed to control channel");

        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "undecodable control message");
                    continue;
                }
            };
            match serde_json::from_str::<TurnNotification>(&payload) {
                Ok(notification) => handler(notification).await,
                Err(err) => warn!(error = %err, "malformed control message"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for RedisTransport {
    async fn append(&self, event: &StreamEvent) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = self.response_key(event.chat_id());
        let _: String = conn
            .xadd(&key, "*", &event.fields())
            .await
            .with_context(|| format!("failed to append to stream {}", key))?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for RedisTransport {
    async fn fetch(&self, user_id: &str) -> Result<Option<ConversationContext>> {
        let mut conn = self.manager.clone();
        let key = self.context_key(user_id);
        let raw: Option<String> = conn
            .get(&key)
            .await
            .with_context(|| format!("failed to read context key {}", key))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => Ok(Some(ConversationContext::from_json(&value))),
            Err(err) => {
                // A corrupt blob degrades to an empty context rather
                // than failing the turn.
                warn!(key = %key, error = %err, "unparseable conversation context");
                Ok(None)
            }
        }
    }
}

/// Collecting sink for tests and the one-off `ask` command.
pub struct MemorySink {
    events: Mutex<Vec<StreamEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn append(&self, event: &StreamEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Fixed-content context store for tests and the one-off `ask` command.
pub struct MemoryContextStore {
    contexts: Mutex<HashMap<String, ConversationContext>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, user_id: &str, context: ConversationContext) {
        self.contexts
            .lock()
            .unwrap()
            .insert(user_id.to_string(), context);
    }
}

impl Default for MemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<ConversationContext>> {
        Ok(self.contexts.lock().unwrap().get(user_id).cloned())
    }
}
