//! Per-turn orchestration and the composition root.
//!
//! [`TurnProcessor`] drives one conversation turn: read the user's
//! conversation context, classify the intent, select and run the
//! generation strategy, and relay the token stream. Every collaborator
//! arrives through [`Collaborators`], constructed once at startup and
//! shared `Arc`'d across turns — connections are injected, never
//! reached through globals.
//!
//! Failure behavior: a classification failure downgrades the turn to
//! the FAQ branch; any other failure ends the turn with the single
//! terminal `error` event. A resolution miss is not a failure.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::completion::ChatModel;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::facts::FactStore;
use crate::generate::{AnswerStrategy, GeneratorDeps};
use crate::index::VectorIndex;
use crate::intent::IntentClassifier;
use crate::models::{history_text, recent_history, Intent, Query};
use crate::relay::{relay, RelayOutcome, FAILED_STATUS};
use crate::resolver::ProductResolver;
use crate::transport::{ContextStore, EventSink, StreamEvent};

/// Why a turn failed. Upstream-dependency failures are not retried;
/// each variant becomes the turn's terminal error event.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid turn input: {0}")]
    Input(String),

    #[error("conversation context unavailable: {0}")]
    Context(#[source] anyhow::Error),

    #[error("answer generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("stream relay failed: {0}")]
    Relay(#[source] anyhow::Error),
}

/// Every external collaborator the pipeline touches, wired once by the
/// composition root.
#[derive(Clone)]
pub struct Collaborators {
    pub intent_embedder: Arc<dyn EmbeddingClient>,
    pub retrieval_embedder: Arc<dyn EmbeddingClient>,
    pub index: Arc<dyn VectorIndex>,
    pub facts: Arc<dyn FactStore>,
    pub chat: Arc<dyn ChatModel>,
    pub context_store: Arc<dyn ContextStore>,
    pub sink: Arc<dyn EventSink>,
}

pub struct TurnProcessor {
    config: Arc<Config>,
    collaborators: Collaborators,
    resolver: ProductResolver,
}

impl TurnProcessor {
    pub fn new(config: Arc<Config>, collaborators: Collaborators) -> Self {
        let resolver = ProductResolver::new(config.resolver.clone());
        Self {
            config,
            collaborators,
            resolver,
        }
    }

    /// Process one turn end to end. Never returns an error: failures are
    /// logged and reported to the conversation channel as the single
    /// terminal error event, and the failed outcome is returned.
    pub async fn process(&self, query: &Query) -> RelayOutcome {
        match self.run_turn(query).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(chat_id = %query.chat_id, error = %err, "turn failed");
                let event = StreamEvent::error(&query.chat_id, FAILED_STATUS);
                if let Err(append_err) = self.collaborators.sink.append(&event).await {
                    error!(
                        chat_id = %query.chat_id,
                        error = %append_err,
                        "could not deliver terminal error event"
                    );
                }
                RelayOutcome::failed()
            }
        }
    }

    async fn run_turn(&self, query: &Query) -> Result<RelayOutcome, TurnError> {
        if query.user_id.is_empty() {
            return Err(TurnError::Input("user id cannot be empty".to_string()));
        }
        if query.text.is_empty() {
            return Err(TurnError::Input("query cannot be empty".to_string()));
        }

        let context = self
            .collaborators
            .context_store
            .fetch(&query.user_id)
            .await
            .map_err(TurnError::Context)?
            .unwrap_or_default();

        let recent = recent_history(&context.history, self.config.resolver.history_depth);
        let history_block = history_text(&recent);

        let intent = self.classify_or_fall_back(query, &history_block).await;

        let strategy = AnswerStrategy::select(&intent);
        info!(chat_id = %query.chat_id, strategy = ?strategy, "selected strategy");

        let deps = GeneratorDeps {
            config: &self.config,
            retrieval_embedder: self.collaborators.retrieval_embedder.as_ref(),
            index: self.collaborators.index.as_ref(),
            facts: self.collaborators.facts.as_ref(),
            chat: self.collaborators.chat.as_ref(),
            resolver: &self.resolver,
        };

        let tokens = strategy
            .generate(
                &deps,
                &intent,
                query,
                &context.products,
                &context.history,
                &history_block,
            )
            .await
            .map_err(TurnError::Generation)?;

        relay(self.collaborators.sink.as_ref(), &query.chat_id, tokens)
            .await
            .map_err(TurnError::Relay)
    }

    /// Classification has no fallback of its own; the pipeline owns the
    /// downgrade to the FAQ branch when it fails.
    async fn classify_or_fall_back(&self, query: &Query, history_block: &str) -> Intent {
        let classifier = IntentClassifier::new(
            &self.config,
            self.collaborators.intent_embedder.as_ref(),
            self.collaborators.index.as_ref(),
            self.collaborators.chat.as_ref(),
        );
        match classifier.classify(&query.text, history_block).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!(
                    chat_id = %query.chat_id,
                    error = %err,
                    "intent classification failed; falling back to FAQ branch"
                );
                Intent::general_faq()
            }
        }
    }
}
