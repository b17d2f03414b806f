//! Core data models used throughout Annuity Chat.
//!
//! These types represent the queries, intents, catalog entries, and
//! retrieved passages that flow through the classification and answer
//! pipeline. Everything that crosses a process boundary is parsed into
//! one of these types at the boundary; no untyped maps travel further.

use serde::{Deserialize, Serialize};

/// One inbound conversation turn.
#[derive(Debug, Clone)]
pub struct Query {
    /// Raw question text, trimmed.
    pub text: String,
    /// Conversation identifier; also keys the response stream.
    pub chat_id: String,
    /// End-user (adviser) identifier; keys the conversation context.
    pub user_id: String,
}

impl Query {
    pub fn new(
        text: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into().trim().to_string(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A past question/answer pair from the conversation-state store.
///
/// The store delivers records most-recent-last; callers that want the
/// resolver's view slice the tail and reverse it (see [`recent_history`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub question: String,
    pub answer: String,
}

/// A catalog entry for a valid annuity product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
}

/// Classified intent of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentCategory {
    /// A question about one specific product (features, riders, issue ages).
    ProductInfo,
    /// A general annuities question (taxes, withdrawals, definitions).
    #[serde(rename = "AnnuitiesFAQ")]
    AnnuitiesFaq,
}

/// Output of the intent classifier: the routing category plus the
/// candidate entities extracted from the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub category: IntentCategory,
    /// Candidate product name; empty when the category is `AnnuitiesFaq`.
    pub product_name: String,
    /// Up to two product properties the question asks about.
    pub properties: Vec<String>,
}

impl Intent {
    /// The fallback intent used when classification fails upstream.
    pub fn general_faq() -> Self {
        Self {
            category: IntentCategory::AnnuitiesFaq,
            product_name: String::new(),
            properties: Vec::new(),
        }
    }
}

/// Outcome of product resolution. Both fields `None` means "no
/// resolvable product" — a valid result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub product_name: Option<String>,
    pub product_id: Option<String>,
}

impl MatchResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.product_name.is_some() || self.product_id.is_some()
    }
}

/// A passage chunk returned from the vector index, reduced to the
/// metadata fields the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedChunk {
    pub text: String,
    pub product_id: String,
    pub file_id: String,
    pub advisor_id: String,
    pub product_name: String,
    pub page_number: i64,
}

impl RetrievedChunk {
    /// Build a chunk from raw index metadata. Missing string fields
    /// default to empty; a missing or unparseable page number defaults
    /// to 1, so malformed metadata degrades instead of failing the turn.
    pub fn from_metadata(meta: &serde_json::Value) -> Self {
        let field = |k: &str| -> String {
            meta.get(k)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let page_number = match meta.get("page_number") {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(1),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(1),
            _ => 1,
        };
        Self {
            text: field("text"),
            product_id: field("product_id"),
            file_id: field("file_id"),
            advisor_id: field("advisor_id"),
            product_name: field("product_name"),
            page_number,
        }
    }

    /// Dedup key for context assembly.
    pub fn dedup_key(&self) -> (String, i64) {
        (self.product_id.clone(), self.page_number)
    }
}

/// A deduplicated, rank-tagged passage ready for citation rendering.
///
/// Ranks are dense, unique, and assigned in first-seen order starting
/// at 1 for the lifetime of one context build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationNode {
    pub rank: u32,
    pub text: String,
    pub product_id: String,
    pub file_id: String,
    pub advisor_id: String,
    pub product_name: String,
    pub page_number: i64,
}

/// The structured fact record for one product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFacts {
    pub product_name: String,
    pub issuer_name: String,
    pub issue_date: String,
    pub product_type: String,
    pub payout_timeline: String,
    pub is_on_sale: bool,
}

/// Per-user conversation context read once per turn from the external
/// key-value store.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    /// Question/answer pairs, most-recent-last as stored.
    pub history: Vec<HistoryRecord>,
    /// The product catalog scoped to this user.
    pub products: Vec<Product>,
}

impl ConversationContext {
    /// Parse the store's JSON blob. The history arrives as a list of
    /// single-entry question→answer objects; multi-entry objects are
    /// accepted and flattened in key order.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        let mut history = Vec::new();
        if let Some(records) = raw.get("history").and_then(|h| h.as_array()) {
            for record in records {
                if let Some(map) = record.as_object() {
                    for (question, answer) in map {
                        history.push(HistoryRecord {
                            question: question.clone(),
                            answer: answer.as_str().unwrap_or_default().to_string(),
                        });
                    }
                }
            }
        }
        let products = raw
            .get("products")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default();
        Self { history, products }
    }
}

/// The most recent history records, most-recent-first — the only slice
/// of history the pipeline ever reads.
pub fn recent_history(history: &[HistoryRecord], depth: usize) -> Vec<HistoryRecord> {
    history.iter().rev().take(depth).cloned().collect()
}

/// Render history records into the `Question:`/`Answer:` text block the
/// prompts consume.
pub fn history_text(records: &[HistoryRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!(
            "Question: {}\nAnswer: {}\n",
            record.question, record.answer
        ));
    }
    out
}
