//! Whole-pipeline tests over in-memory collaborators.
//!
//! Each test wires a [`TurnProcessor`] with the in-memory index, fact
//! store, context store, and sink, plus a scripted chat model, then
//! asserts on the events observed on the conversation channel and the
//! relay outcome.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use annuity_chat::completion::{ChatModel, ChatRequest, TokenStream, UserContent};
use annuity_chat::config::Config;
use annuity_chat::embedding::EmbeddingClient;
use annuity_chat::facts::MemoryFactStore;
use annuity_chat::index::MemoryIndex;
use annuity_chat::models::{ConversationContext, ProductFacts, Query};
use annuity_chat::pipeline::{Collaborators, TurnProcessor};
use annuity_chat::relay::{RelayStatus, COMPLETED_STATUS, FAILED_STATUS};
use annuity_chat::transport::{MemoryContextStore, MemorySink, StreamEvent};

fn test_config() -> Arc<Config> {
    Arc::new(
        toml::from_str(
            r#"
[server]
bind = "127.0.0.1:0"

[redis]
url = "redis://127.0.0.1:6379"
prefix = "test"

[facts]
path = "/tmp/unused-facts.sqlite"
"#,
        )
        .unwrap(),
    )
}

struct FixedEmbedder;

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingClient for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// What the scripted model should do per call.
#[derive(Clone)]
enum StreamScript {
    Tokens(Vec<&'static str>),
    FailAfter(Vec<&'static str>),
    RefuseRequest,
}

struct ScriptedChat {
    /// JSON the classifier call returns; `Err` string simulates outage.
    intent_response: std::result::Result<String, String>,
    stream_script: StreamScript,
    stream_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    fn new(intent_json: serde_json::Value, script: StreamScript) -> Self {
        Self {
            intent_response: Ok(intent_json.to_string()),
            stream_script: script,
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_intent_outage(script: StreamScript) -> Self {
        Self {
            intent_response: Err("intent model down".to_string()),
            stream_script: script,
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    fn last_stream_request(&self) -> Option<ChatRequest> {
        self.stream_requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, _req: ChatRequest) -> Result<String> {
        match &self.intent_response {
            Ok(json) => Ok(json.clone()),
            Err(msg) => anyhow::bail!("{msg}"),
        }
    }

    async fn stream(&self, req: ChatRequest) -> Result<TokenStream> {
        self.stream_requests.lock().unwrap().push(req);
        match &self.stream_script {
            StreamScript::Tokens(tokens) => {
                let items: Vec<Result<String>> =
                    tokens.iter().map(|t| Ok(t.to_string())).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            StreamScript::FailAfter(tokens) => {
                let mut items: Vec<Result<String>> =
                    tokens.iter().map(|t| Ok(t.to_string())).collect();
                items.push(Err(anyhow::anyhow!("model connection reset")));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            StreamScript::RefuseRequest => anyhow::bail!("completion endpoint unavailable"),
        }
    }
}

fn product_intent_json() -> serde_json::Value {
    serde_json::json!({
        "thought": "asks about one product",
        "intent": "ProductInfo",
        "product_name": "Allianz Index Advantage Income",
        "product_info_properties": ["issuer"]
    })
}

fn faq_intent_json() -> serde_json::Value {
    serde_json::json!({
        "thought": "general question",
        "intent": "AnnuitiesFAQ",
        "product_name": "",
        "product_info_properties": []
    })
}

struct Fixture {
    processor: TurnProcessor,
    sink: Arc<MemorySink>,
    chat: Arc<ScriptedChat>,
}

fn fixture(chat: ScriptedChat, intent_embedder: Arc<dyn EmbeddingClient>) -> Fixture {
    let config = test_config();
    let chat = Arc::new(chat);
    let sink = Arc::new(MemorySink::new());

    let index = MemoryIndex::new();
    index.insert(
        &config.index.passage_namespace,
        vec![1.0, 0.0],
        serde_json::json!({
            "text": "The income rider guarantees lifetime withdrawals.",
            "product_id": "p-1",
            "file_id": "f-1",
            "advisor_id": "a-1",
            "product_name": "Allianz Index Advantage Income",
            "page_number": 3
        }),
    );

    let facts = MemoryFactStore::new();
    facts.insert(
        "p-1",
        ProductFacts {
            product_name: "Allianz Index Advantage Income".to_string(),
            issuer_name: "Allianz Life".to_string(),
            product_type: "RILA".to_string(),
            is_on_sale: true,
            ..Default::default()
        },
    );

    let context_store = MemoryContextStore::new();
    context_store.insert(
        "u-1",
        ConversationContext::from_json(&serde_json::json!({
            "history": [
                {"What is a surrender period?": "A surrender period is..."}
            ],
            "products": [{"id": "p-1", "name": "Allianz Index Advantage Income"}]
        })),
    );

    let collaborators = Collaborators {
        intent_embedder,
        retrieval_embedder: Arc::new(FixedEmbedder),
        index: Arc::new(index),
        facts: Arc::new(facts),
        chat: chat.clone(),
        context_store: Arc::new(context_store),
        sink: sink.clone(),
    };

    Fixture {
        processor: TurnProcessor::new(config, collaborators),
        sink,
        chat,
    }
}

fn terminal_events(events: &[StreamEvent]) -> Vec<&StreamEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

#[tokio::test]
async fn product_turn_streams_grounded_answer() {
    let f = fixture(
        ScriptedChat::new(
            product_intent_json(),
            StreamScript::Tokens(vec!["The income rider ", "guarantees withdrawals."]),
        ),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("Who issues the Allianz Index Advantage Income?", "c-1", "u-1");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Success);
    assert_eq!(outcome.response, "The income rider guarantees withdrawals.");

    let events = f.sink.events();
    assert_eq!(
        events,
        vec![
            StreamEvent::stream("c-1", "The income rider "),
            StreamEvent::stream("c-1", "guarantees withdrawals."),
            StreamEvent::ended("c-1", COMPLETED_STATUS),
        ]
    );

    // The grounded request carried facts, citation context, and the
    // trailing question, in that order.
    let request = f.chat.last_stream_request().unwrap();
    let UserContent::Fragments(fragments) = request.user else {
        panic!("grounded path must send fragments");
    };
    assert!(fragments[0].contains("Allianz Life"));
    assert!(fragments[1].contains("<Text Document Index: 1>"));
    assert!(fragments.last().unwrap().starts_with("Current Question:"));
}

#[tokio::test]
async fn faq_turn_skips_retrieval() {
    let f = fixture(
        ScriptedChat::new(
            faq_intent_json(),
            StreamScript::Tokens(vec!["A fixed annuity ", "pays a set rate."]),
        ),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("What is a fixed annuity?", "c-2", "u-1");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Success);
    assert_eq!(outcome.response, "A fixed annuity pays a set rate.");

    let request = f.chat.last_stream_request().unwrap();
    assert!(matches!(request.user, UserContent::Text(ref t) if t == "What is a fixed annuity?"));

    let events = f.sink.events();
    assert_eq!(terminal_events(&events).len(), 1);
    assert!(matches!(events.last().unwrap(), StreamEvent::Ended { .. }));
}

#[tokio::test]
async fn classifier_outage_falls_back_to_faq_branch() {
    let f = fixture(
        ScriptedChat::with_intent_outage(StreamScript::Tokens(vec!["General answer."])),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("Who issues the Allianz product?", "c-3", "u-1");
    let outcome = f.processor.process(&query).await;

    // The turn still succeeds, answered by the FAQ strategy.
    assert_eq!(outcome.status, RelayStatus::Success);
    let request = f.chat.last_stream_request().unwrap();
    assert!(matches!(request.user, UserContent::Text(_)));
    assert!(matches!(
        f.sink.events().last().unwrap(),
        StreamEvent::Ended { .. }
    ));
}

#[tokio::test]
async fn intent_embedding_outage_also_falls_back() {
    let f = fixture(
        ScriptedChat::new(
            product_intent_json(),
            StreamScript::Tokens(vec!["Fallback answer."]),
        ),
        Arc::new(FailingEmbedder),
    );

    let query = Query::new("Who issues it?", "c-4", "u-1");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Success);
    // FAQ branch: the stream request carries the raw question, not fragments.
    let request = f.chat.last_stream_request().unwrap();
    assert!(matches!(request.user, UserContent::Text(_)));
}

#[tokio::test]
async fn completion_refusal_emits_single_error_event() {
    let f = fixture(
        ScriptedChat::new(product_intent_json(), StreamScript::RefuseRequest),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("Who issues it?", "c-5", "u-1");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Failed);
    assert!(outcome.response.is_empty());

    let events = f.sink.events();
    assert_eq!(events, vec![StreamEvent::error("c-5", FAILED_STATUS)]);
}

#[tokio::test]
async fn mid_stream_failure_discards_partial_response() {
    let f = fixture(
        ScriptedChat::new(
            product_intent_json(),
            StreamScript::FailAfter(vec!["partial "]),
        ),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("Who issues it?", "c-6", "u-1");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Failed);
    assert!(outcome.response.is_empty());

    let events = f.sink.events();
    assert_eq!(
        events,
        vec![
            StreamEvent::stream("c-6", "partial "),
            StreamEvent::error("c-6", FAILED_STATUS),
        ]
    );
}

#[tokio::test]
async fn empty_user_id_fails_without_touching_the_model() {
    let f = fixture(
        ScriptedChat::new(product_intent_json(), StreamScript::Tokens(vec!["x"])),
        Arc::new(FixedEmbedder),
    );

    let query = Query::new("question", "c-7", "");
    let outcome = f.processor.process(&query).await;

    assert_eq!(outcome.status, RelayStatus::Failed);
    assert!(f.chat.last_stream_request().is_none());
    assert_eq!(
        f.sink.events(),
        vec![StreamEvent::error("c-7", FAILED_STATUS)]
    );
}

#[tokio::test]
async fn concurrent_turns_keep_per_chat_ordering() {
    let f = Arc::new(fixture(
        ScriptedChat::new(
            faq_intent_json(),
            StreamScript::Tokens(vec!["one ", "two ", "three"]),
        ),
        Arc::new(FixedEmbedder),
    ));

    let mut handles = Vec::new();
    for chat_id in ["c-a", "c-b", "c-c"] {
        let f = f.clone();
        handles.push(tokio::spawn(async move {
            let query = Query::new("What is an annuity?", chat_id, "u-1");
            f.processor.process(&query).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, RelayStatus::Success);
    }

    let events = f.sink.events();
    for chat_id in ["c-a", "c-b", "c-c"] {
        let chat_events: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| e.chat_id() == chat_id)
            .collect();
        let data: Vec<&str> = chat_events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Stream { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(data, vec!["one ", "two ", "three"]);
        assert!(chat_events.last().unwrap().is_terminal());
        assert_eq!(
            chat_events.iter().filter(|e| e.is_terminal()).count(),
            1,
            "exactly one terminal event for {chat_id}"
        );
    }
}
