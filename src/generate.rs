//! Answer-generation strategies.
//!
//! Two strategies sit behind one `generate` seam, selected strictly by
//! the classified intent: the product-grounded path (resolve → facts →
//! retrieve → context → streaming completion) and the general-FAQ path
//! (domain-restricted prompt + raw query, no retrieval). Both return
//! the lazy token sequence the relay consumes; both let errors
//! propagate so the streaming layer can turn them into the single
//! terminal error event.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::completion::{ChatModel, ChatRequest, TokenStream, UserContent};
use crate::config::Config;
use crate::context::build_context;
use crate::embedding::EmbeddingClient;
use crate::facts::FactStore;
use crate::index::VectorIndex;
use crate::models::{
    recent_history, HistoryRecord, Intent, IntentCategory, MatchResult, Product, Query,
    RetrievedChunk,
};
use crate::prompts::{FAQ_SYS_PROMPT, GROUNDED_SYS_PROMPT, NO_PRODUCT_TEMPLATE};
use crate::resolver::{llm_name_match, ProductResolver};

/// Collaborators the strategies draw on, borrowed for one turn.
pub struct GeneratorDeps<'a> {
    pub config: &'a Config,
    pub retrieval_embedder: &'a dyn EmbeddingClient,
    pub index: &'a dyn VectorIndex,
    pub facts: &'a dyn FactStore,
    pub chat: &'a dyn ChatModel,
    pub resolver: &'a ProductResolver,
}

/// The generation strategy for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStrategy {
    ProductGrounded,
    GeneralFaq,
}

impl AnswerStrategy {
    /// Select the strategy from the classified intent.
    pub fn select(intent: &Intent) -> Self {
        match intent.category {
            IntentCategory::ProductInfo => Self::ProductGrounded,
            IntentCategory::AnnuitiesFaq => Self::GeneralFaq,
        }
    }

    /// Produce the lazy token sequence for this turn.
    pub async fn generate(
        &self,
        deps: &GeneratorDeps<'_>,
        intent: &Intent,
        query: &Query,
        products: &[Product],
        history: &[HistoryRecord],
        history_block: &str,
    ) -> Result<TokenStream> {
        match self {
            Self::ProductGrounded => {
                grounded_answer(deps, intent, query, products, history, history_block).await
            }
            Self::GeneralFaq => faq_answer(deps, query).await,
        }
    }
}

/// The general-FAQ path: no retrieval, just the domain-restricted
/// system prompt and the raw question.
async fn faq_answer(deps: &GeneratorDeps<'_>, query: &Query) -> Result<TokenStream> {
    let request = ChatRequest {
        model: deps.config.chat.model.clone(),
        system: FAQ_SYS_PROMPT.to_string(),
        user: UserContent::Text(query.text.clone()),
        temperature: deps.config.chat.temperature,
        max_tokens: Some(deps.config.chat.max_tokens),
        response_schema: None,
    };
    deps.chat
        .stream(request)
        .await
        .context("FAQ completion request failed")
}

/// The product-grounded path.
async fn grounded_answer(
    deps: &GeneratorDeps<'_>,
    intent: &Intent,
    query: &Query,
    products: &[Product],
    history: &[HistoryRecord],
    history_block: &str,
) -> Result<TokenStream> {
    let recent = recent_history(history, deps.config.resolver.history_depth);
    let resolved = deps
        .resolver
        .resolve(&query.text, &recent, &intent.product_name, products);
    info!(
        chat_id = %query.chat_id,
        product = ?resolved.product_name,
        product_id = ?resolved.product_id,
        "product resolution"
    );

    if deps.config.resolver.llm_diagnostic {
        run_llm_diagnostic(deps, query, history_block, intent, products, &resolved).await;
    }

    let user = if resolved.is_match() {
        let fragments = grounded_fragments(deps, query, &resolved).await?;
        UserContent::Fragments(fragments)
    } else {
        UserContent::Text(NO_PRODUCT_TEMPLATE.replace("{question}", &query.text))
    };

    let request = ChatRequest {
        model: deps.config.chat.grounded_model.clone(),
        system: GROUNDED_SYS_PROMPT.to_string(),
        user,
        temperature: deps.config.chat.temperature,
        max_tokens: Some(deps.config.chat.max_tokens),
        response_schema: None,
    };
    deps.chat
        .stream(request)
        .await
        .context("grounded completion request failed")
}

/// Assemble the ordered fragment list for a resolved product: the
/// structured-facts fragment, the citation fragments in rank order, and
/// the trailing question fragment.
async fn grounded_fragments(
    deps: &GeneratorDeps<'_>,
    query: &Query,
    resolved: &MatchResult,
) -> Result<Vec<String>> {
    let facts = match (&resolved.product_id, &resolved.product_name) {
        (Some(id), _) => deps.facts.find_by_product_id(id).await?,
        (None, Some(name)) => deps.facts.find_by_product_name(name).await?,
        (None, None) => None,
    };
    let facts_json = match &facts {
        Some(facts) => serde_json::to_string(facts)?,
        None => "{}".to_string(),
    };

    let query_vector = deps
        .retrieval_embedder
        .embed(&query.text)
        .await
        .context("retrieval embedding failed")?;

    let filter = match (&resolved.product_id, &resolved.product_name) {
        (Some(id), _) => serde_json::json!({ "product_id": id }),
        (_, Some(name)) => serde_json::json!({ "product_name": name }),
        _ => serde_json::json!({}),
    };

    let matches = deps
        .index
        .query(
            &deps.config.index.passage_namespace,
            &query_vector,
            deps.config.retrieval.top_k,
            Some(&filter),
            true,
        )
        .await
        .context("passage retrieval failed")?;

    let chunks: Vec<RetrievedChunk> = matches
        .iter()
        .map(|m| RetrievedChunk::from_metadata(&m.metadata))
        .collect();

    let bundle = build_context(&chunks, deps.config.retrieval.with_citations);
    info!(
        chat_id = %query.chat_id,
        retrieved = chunks.len(),
        cited = bundle.nodes.len(),
        "assembled grounding context"
    );

    let mut fragments = Vec::with_capacity(bundle.fragments.len() + 2);
    fragments.push(format!("Basic Facts: {}\n\n", facts_json));
    fragments.extend(bundle.fragments);
    fragments.push(format!("Current Question: {}. Let's begin!", query.text));
    Ok(fragments)
}

/// Run the LLM name matcher next to the deterministic result and log
/// the comparison. Never affects the turn.
async fn run_llm_diagnostic(
    deps: &GeneratorDeps<'_>,
    query: &Query,
    history_block: &str,
    intent: &Intent,
    products: &[Product],
    resolved: &MatchResult,
) {
    match llm_name_match(
        deps.chat,
        &deps.config.chat.model,
        &query.text,
        history_block,
        &intent.product_name,
        products,
    )
    .await
    {
        Ok(diagnostic) => {
            if diagnostic.product_name != resolved.product_name {
                info!(
                    chat_id = %query.chat_id,
                    resolver = ?resolved.product_name,
                    llm = ?diagnostic.product_name,
                    "name matchers diverge"
                );
            }
        }
        Err(err) => warn!(chat_id = %query.chat_id, error = %err, "llm name matcher failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::facts::MemoryFactStore;
    use crate::index::MemoryIndex;
    use crate::models::ProductFacts;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    fn test_config() -> Config {
        toml::from_str(
            r#"
[server]
bind = "127.0.0.1:0"

[redis]
url = "redis://127.0.0.1:6379"
prefix = "test"

[facts]
path = "/tmp/facts.sqlite"
"#,
        )
        .unwrap()
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

    /// Captures the streaming request and plays back scripted tokens.
    struct CapturingChat {
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl CapturingChat {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for CapturingChat {
        async fn complete(&self, _req: ChatRequest) -> Result<String> {
            Ok("{}".to_string())
        }

        async fn stream(&self, req: ChatRequest) -> Result<TokenStream> {
            self.requests.lock().unwrap().push(req);
            Ok(Box::pin(futures::stream::iter(vec![Ok("ok".to_string())])))
        }
    }

    fn deps<'a>(
        config: &'a Config,
        index: &'a MemoryIndex,
        facts: &'a MemoryFactStore,
        chat: &'a CapturingChat,
        resolver: &'a ProductResolver,
    ) -> GeneratorDeps<'a> {
        GeneratorDeps {
            config,
            retrieval_embedder: &FixedEmbedder,
            index,
            facts,
            chat,
            resolver,
        }
    }

    fn product_intent(name: &str) -> Intent {
        Intent {
            category: IntentCategory::ProductInfo,
            product_name: name.to_string(),
            properties: vec![],
        }
    }

    #[test]
    fn strategy_selection_follows_intent_category() {
        assert_eq!(
            AnswerStrategy::select(&product_intent("X")),
            AnswerStrategy::ProductGrounded
        );
        assert_eq!(
            AnswerStrategy::select(&Intent::general_faq()),
            AnswerStrategy::GeneralFaq
        );
    }

    #[tokio::test]
    async fn faq_path_uses_raw_query_without_retrieval() {
        let config = test_config();
        let index = MemoryIndex::new();
        let facts = MemoryFactStore::new();
        let chat = CapturingChat::new();
        let resolver = ProductResolver::new(config.resolver.clone());
        let deps = deps(&config, &index, &facts, &chat, &resolver);

        let query = Query::new("what is a fixed annuity", "c-1", "u-1");
        let mut stream = AnswerStrategy::GeneralFaq
            .generate(&deps, &Intent::general_faq(), &query, &[], &[], "")
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "ok");

        let req = chat.last_request();
        assert_eq!(req.model, config.chat.model);
        assert!(matches!(req.user, UserContent::Text(ref t) if t == "what is a fixed annuity"));
        assert!(req.response_schema.is_none());
    }

    #[tokio::test]
    async fn grounded_path_orders_facts_context_question() {
        let config = test_config();
        let index = MemoryIndex::new();
        index.insert(
            &config.index.passage_namespace,
            vec![1.0, 0.0],
            serde_json::json!({
                "text": "Income rider details.",
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
                ..Default::default()
            },
        );
        let chat = CapturingChat::new();
        let resolver = ProductResolver::new(config.resolver.clone());
        let deps = deps(&config, &index, &facts, &chat, &resolver);

        let catalog = vec![Product {
            id: "p-1".to_string(),
            name: "Allianz Index Advantage Income".to_string(),
        }];
        let query = Query::new("tell me about the income rider", "c-1", "u-1");
        let intent = product_intent("Allianz Index Advantage Income");

        AnswerStrategy::ProductGrounded
            .generate(&deps, &intent, &query, &catalog, &[], "")
            .await
            .unwrap();

        let req = chat.last_request();
        assert_eq!(req.model, config.chat.grounded_model);
        let UserContent::Fragments(fragments) = req.user else {
            panic!("grounded path must send fragments");
        };
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].starts_with("Basic Facts: "));
        assert!(fragments[0].contains("Allianz Life"));
        assert!(fragments[1].contains("<Text Document Index: 1>"));
        assert!(fragments[1].contains("Income rider details."));
        assert!(fragments[2].starts_with("Current Question: "));
    }

    #[tokio::test]
    async fn retrieval_is_filtered_by_resolved_product() {
        let config = test_config();
        let index = MemoryIndex::new();
        for (pid, text) in [("p-1", "about product one"), ("p-2", "about product two")] {
            index.insert(
                &config.index.passage_namespace,
                vec![1.0, 0.0],
                serde_json::json!({
                    "text": text,
                    "product_id": pid,
                    "file_id": "f",
                    "advisor_id": "a",
                    "product_name": "n",
                    "page_number": 1
                }),
            );
        }
        let facts = MemoryFactStore::new();
        let chat = CapturingChat::new();
        let resolver = ProductResolver::new(config.resolver.clone());
        let deps = deps(&config, &index, &facts, &chat, &resolver);

        let catalog = vec![Product {
            id: "p-2".to_string(),
            name: "Product Two".to_string(),
        }];
        let query = Query::new("features?", "c-1", "u-1");
        let intent = product_intent("Product Two");

        AnswerStrategy::ProductGrounded
            .generate(&deps, &intent, &query, &catalog, &[], "")
            .await
            .unwrap();

        let UserContent::Fragments(fragments) = chat.last_request().user else {
            panic!("expected fragments");
        };
        // facts + one filtered passage + question
        assert_eq!(fragments.len(), 3);
        assert!(fragments[1].contains("about product two"));
    }

    #[tokio::test]
    async fn unresolved_product_gets_explicit_no_match_framing() {
        let config = test_config();
        let index = MemoryIndex::new();
        let facts = MemoryFactStore::new();
        let chat = CapturingChat::new();
        let resolver = ProductResolver::new(config.resolver.clone());
        let deps = deps(&config, &index, &facts, &chat, &resolver);

        let query = Query::new("about some unknown thing", "c-1", "u-1");
        let intent = product_intent("Unknown Product");

        AnswerStrategy::ProductGrounded
            .generate(&deps, &intent, &query, &[], &[], "")
            .await
            .unwrap();

        let req = chat.last_request();
        let UserContent::Text(text) = req.user else {
            panic!("no-match framing is a single text fragment");
        };
        assert!(text.contains("Could not find any product matching the query"));
        assert!(text.contains("about some unknown thing"));
    }

    #[tokio::test]
    async fn missing_facts_render_empty_object() {
        let config = test_config();
        let index = MemoryIndex::new();
        let facts = MemoryFactStore::new();
        let chat = CapturingChat::new();
        let resolver = ProductResolver::new(config.resolver.clone());
        let deps = deps(&config, &index, &facts, &chat, &resolver);

        let catalog = vec![Product {
            id: "p-9".to_string(),
            name: "Brighthouse Shield".to_string(),
        }];
        let query = Query::new("fees?", "c-1", "u-1");
        let intent = product_intent("Brighthouse Shield");

        AnswerStrategy::ProductGrounded
            .generate(&deps, &intent, &query, &catalog, &[], "")
            .await
            .unwrap();

        let UserContent::Fragments(fragments) = chat.last_request().user else {
            panic!("expected fragments");
        };
        assert_eq!(fragments[0], "Basic Facts: {}\n\n");
    }
}
