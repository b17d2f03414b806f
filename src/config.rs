use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub facts: FactsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval_embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Key prefix shared with the surrounding platform.
    pub prefix: String,
    /// Control channel suffix; the full channel is `{prefix}_{topic}`.
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "stream".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FactsConfig {
    /// SQLite database path for the structured product-fact records.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Base URL of the OpenAI-compatible completions API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Model for classification and the FAQ strategy.
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// Model for the product-grounded strategy.
    #[serde(default = "default_grounded_model")]
    pub grounded_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_chat_model(),
            grounded_model: default_grounded_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_grounded_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    120
}

/// One embedding backend. Two instances exist in the config: `[embedding]`
/// for intent classification and `[retrieval_embedding]` for passage
/// retrieval, which may use a different model and dimensionality.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"endpoint"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint URL for the `"endpoint"` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"http"` for a Pinecone-style endpoint, `"memory"` for local runs.
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_intent_namespace")]
    pub intent_namespace: String,
    #[serde(default = "default_passage_namespace")]
    pub passage_namespace: String,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            url: None,
            intent_namespace: default_intent_namespace(),
            passage_namespace: default_passage_namespace(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "memory".to_string()
}
fn default_intent_namespace() -> String {
    "intent-examples".to_string()
}
fn default_passage_namespace() -> String {
    "doc-passages".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    /// Few-shot examples retrieved per classification.
    #[serde(default = "default_example_k")]
    pub example_k: usize,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            example_k: default_example_k(),
        }
    }
}

fn default_example_k() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages fetched per grounded answer.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Wrap context fragments with citation markers.
    #[serde(default = "default_with_citations")]
    pub with_citations: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            with_citations: default_with_citations(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_with_citations() -> bool {
    true
}

/// Tuning for the staged product resolver. These are heuristics, not
/// exact algorithms; every threshold stays configurable.
///
/// The predicted-name stage requires a higher entry floor to be
/// considered at all but accepts at a higher combined bar; the raw-query
/// stage enters lower and accepts lower because natural language is the
/// noisier signal.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// History records scanned by the short-circuit stage.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// Candidates kept from the partial-ratio prefilter.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_predicted_floor")]
    pub predicted_floor: f64,
    #[serde(default = "default_predicted_token_floor")]
    pub predicted_token_floor: f64,
    #[serde(default = "default_predicted_full_floor")]
    pub predicted_full_floor: f64,
    #[serde(default = "default_predicted_accept")]
    pub predicted_accept: f64,
    #[serde(default = "default_query_floor")]
    pub query_floor: f64,
    #[serde(default = "default_query_token_floor")]
    pub query_token_floor: f64,
    #[serde(default = "default_query_full_floor")]
    pub query_full_floor: f64,
    #[serde(default = "default_query_accept")]
    pub query_accept: f64,
    #[serde(default = "default_partial_weight")]
    pub partial_weight: f64,
    #[serde(default = "default_token_weight")]
    pub token_weight: f64,
    #[serde(default = "default_full_weight")]
    pub full_weight: f64,
    #[serde(default = "default_first_letter_bonus")]
    pub first_letter_bonus: f64,
    /// Run the LLM name matcher alongside the deterministic resolver and
    /// log its verdict. Diagnostic only; never used as the result.
    #[serde(default)]
    pub llm_diagnostic: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            candidate_limit: default_candidate_limit(),
            predicted_floor: default_predicted_floor(),
            predicted_token_floor: default_predicted_token_floor(),
            predicted_full_floor: default_predicted_full_floor(),
            predicted_accept: default_predicted_accept(),
            query_floor: default_query_floor(),
            query_token_floor: default_query_token_floor(),
            query_full_floor: default_query_full_floor(),
            query_accept: default_query_accept(),
            partial_weight: default_partial_weight(),
            token_weight: default_token_weight(),
            full_weight: default_full_weight(),
            first_letter_bonus: default_first_letter_bonus(),
            llm_diagnostic: false,
        }
    }
}

fn default_history_depth() -> usize {
    2
}
fn default_candidate_limit() -> usize {
    5
}
fn default_predicted_floor() -> f64 {
    90.0
}
fn default_predicted_token_floor() -> f64 {
    75.0
}
fn default_predicted_full_floor() -> f64 {
    60.0
}
fn default_predicted_accept() -> f64 {
    85.0
}
fn default_query_floor() -> f64 {
    85.0
}
fn default_query_token_floor() -> f64 {
    65.0
}
fn default_query_full_floor() -> f64 {
    50.0
}
fn default_query_accept() -> f64 {
    75.0
}
fn default_partial_weight() -> f64 {
    0.4
}
fn default_token_weight() -> f64 {
    0.4
}
fn default_full_weight() -> f64 {
    0.2
}
fn default_first_letter_bonus() -> f64 {
    10.0
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.redis.prefix.is_empty() {
        anyhow::bail!("redis.prefix must not be empty");
    }

    for (section, embedding) in [
        ("embedding", &config.embedding),
        ("retrieval_embedding", &config.retrieval_embedding),
    ] {
        match embedding.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if embedding.model.is_none() {
                    anyhow::bail!("{}.model must be specified for the openai provider", section);
                }
            }
            "endpoint" => {
                if embedding.url.is_none() {
                    anyhow::bail!("{}.url must be specified for the endpoint provider", section);
                }
            }
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled, openai, or endpoint.",
                section,
                other
            ),
        }
    }

    match config.index.provider.as_str() {
        "memory" => {}
        "http" => {
            if config.index.url.is_none() {
                anyhow::bail!("index.url must be specified for the http provider");
            }
        }
        other => anyhow::bail!("Unknown index provider: '{}'. Must be http or memory.", other),
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be > 0");
    }

    let r = &config.resolver;
    if r.candidate_limit == 0 {
        anyhow::bail!("resolver.candidate_limit must be > 0");
    }
    let weight_sum = r.partial_weight + r.token_weight + r.full_weight;
    if !(0.99..=1.01).contains(&weight_sum) {
        anyhow::bail!(
            "resolver score weights must sum to 1.0 (got {})",
            weight_sum
        );
    }
    for (name, value) in [
        ("predicted_floor", r.predicted_floor),
        ("predicted_accept", r.predicted_accept),
        ("query_floor", r.query_floor),
        ("query_accept", r.query_accept),
    ] {
        if !(0.0..=100.0).contains(&value) {
            anyhow::bail!("resolver.{} must be in [0, 100]", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[server]
bind = "127.0.0.1:8600"

[redis]
url = "redis://127.0.0.1:6379"
prefix = "cai"

[facts]
path = "./data/facts.sqlite"
"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.redis.topic, "stream");
        assert_eq!(config.intent.example_k, 20);
        assert_eq!(config.retrieval.top_k, 20);
        assert_eq!(config.resolver.predicted_floor, 90.0);
        assert_eq!(config.resolver.query_accept, 75.0);
        assert!(!config.resolver.llm_diagnostic);
    }

    #[test]
    fn bad_weights_rejected() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.resolver.partial_weight = 0.9;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn endpoint_provider_requires_url() {
        let toml_text = format!(
            "{}\n[retrieval_embedding]\nprovider = \"endpoint\"\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_text).unwrap();
        assert!(validate(&config).is_err());
    }
}
