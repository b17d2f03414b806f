//! Intent classification from a few-shot example set.
//!
//! A query is embedded, the nearest stored example payloads are pulled
//! from the intent namespace of the vector index, and a
//! schema-constrained completion at temperature 0 produces the
//! [`Intent`]. The predicted product name is scrubbed of everything but
//! word characters, whitespace, and periods before it reaches the
//! resolver, since injected punctuation from the model would poison the
//! fuzzy stages.
//!
//! This stage has no fallback of its own: any embedding, retrieval, or
//! completion failure propagates, and the pipeline routes the turn down
//! the FAQ branch instead.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::completion::{ChatModel, ChatRequest, UserContent};
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::index::VectorIndex;
use crate::models::{Intent, IntentCategory};
use crate::prompts::{INTENT_SYS_PROMPT, INTENT_USER_TEMPLATE};

/// Maximum properties carried forward from the classifier output.
const MAX_PROPERTIES: usize = 2;

/// The classifier's structured-output payload.
#[derive(Debug, Deserialize)]
struct IntentPayload {
    /// Short chain-of-thought the schema asks for; logged only.
    #[serde(default)]
    thought: String,
    intent: IntentCategory,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    product_info_properties: Vec<String>,
}

/// JSON Schema for the structured completion.
fn intent_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "thought": {
                "type": "string",
                "description": "4-5 words of reasoning before deciding."
            },
            "intent": {
                "type": "string",
                "enum": ["ProductInfo", "AnnuitiesFAQ"],
                "description": "The intent of the user's message."
            },
            "product_name": {
                "type": "string",
                "description": "Product the user may be asking about. Blank for AnnuitiesFAQ."
            },
            "product_info_properties": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Up to two product properties the question asks about."
            }
        },
        "required": ["thought", "intent", "product_name", "product_info_properties"],
        "additionalProperties": false
    })
}

/// Strip everything except word characters, whitespace, and periods.
pub fn clean_candidate_name(raw: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"[^\w\s.]").unwrap());
    pattern.replace_all(raw, "").into_owned()
}

pub struct IntentClassifier<'a> {
    config: &'a Config,
    embedder: &'a dyn EmbeddingClient,
    index: &'a dyn VectorIndex,
    chat: &'a dyn ChatModel,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(
        config: &'a Config,
        embedder: &'a dyn EmbeddingClient,
        index: &'a dyn VectorIndex,
        chat: &'a dyn ChatModel,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
            chat,
        }
    }

    pub async fn classify(&self, query: &str, history: &str) -> Result<Intent> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("intent embedding failed")?;

        let matches = self
            .index
            .query(
                &self.config.index.intent_namespace,
                &vector,
                self.config.intent.example_k,
                None,
                true,
            )
            .await
            .context("few-shot example retrieval failed")?;

        let examples = matches
            .iter()
            .filter_map(|m| m.metadata.get("payload").and_then(|p| p.as_str()))
            .collect::<Vec<_>>()
            .join("\n");

        let date_today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let user_message = INTENT_USER_TEMPLATE
            .replace("{date_today}", &date_today)
            .replace("{history}", history)
            .replace("{question}", query);

        let request = ChatRequest {
            model: self.config.chat.model.clone(),
            system: INTENT_SYS_PROMPT.replace("{examples}", &examples),
            user: UserContent::Text(user_message),
            temperature: 0.0,
            max_tokens: None,
            response_schema: Some(("intent_classification".to_string(), intent_schema())),
        };

        let content = self
            .chat
            .complete(request)
            .await
            .context("intent completion failed")?;

        let payload: IntentPayload =
            serde_json::from_str(&content).context("classifier returned malformed payload")?;

        let mut properties = payload.product_info_properties;
        properties.truncate(MAX_PROPERTIES);

        let intent = Intent {
            category: payload.intent,
            product_name: clean_candidate_name(&payload.product_name),
            properties,
        };
        info!(
            category = ?intent.category,
            product_name = %intent.product_name,
            thought = %payload.thought,
            "classified intent"
        );
        Ok(intent)
    }
}
