//! # Annuity Chat CLI (`anc`)
//!
//! | Command | Description |
//! |---------|-------------|
//! | `anc init` | Create the facts database schema |
//! | `anc serve` | Run the HTTP surface and the control-channel subscriber |
//! | `anc ask "<question>"` | Run one turn locally, streaming the answer to stdout |
//! | `anc classify "<question>"` | Print the classified intent |
//! | `anc resolve "<query>" --catalog <file>` | Print the resolver's decision |
//!
//! All commands accept `--config` pointing at a TOML configuration
//! file. Secrets are read from the environment (`OPENAI_API_KEY`,
//! `PINECONE_API_KEY`, `EMBED_ENDPOINT_TOKEN`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use annuity_chat::completion::OpenAiChat;
use annuity_chat::config::{load_config, Config};
use annuity_chat::db;
use annuity_chat::embedding::create_embedder;
use annuity_chat::facts::SqliteFactStore;
use annuity_chat::index::{HttpIndex, MemoryIndex, VectorIndex};
use annuity_chat::intent::IntentClassifier;
use annuity_chat::models::{ConversationContext, Product, Query};
use annuity_chat::pipeline::{Collaborators, TurnProcessor};
use annuity_chat::resolver::ProductResolver;
use annuity_chat::server::run_server;
use annuity_chat::transport::{
    EventSink, MemoryContextStore, RedisTransport, StreamEvent,
};

/// Annuity Chat — intent-routed retrieval and streaming answers for
/// annuity product questions.
#[derive(Parser)]
#[command(
    name = "anc",
    about = "Annuity Chat — intent-routed retrieval and streaming answer service",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/anc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the facts database schema. Idempotent.
    Init,

    /// Run the service: HTTP surface plus the Redis control-channel
    /// subscriber that turns pub/sub notifications into processed turns.
    Serve,

    /// Run one turn locally with an empty (or file-provided) context,
    /// printing streamed increments to stdout.
    Ask {
        question: String,
        /// Chat id to tag events with; a fresh UUID when omitted.
        #[arg(long)]
        chat_id: Option<String>,
        /// Optional JSON file with `{ "history": [...], "products": [...] }`.
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Classify a question and print the intent.
    Classify { question: String },

    /// Resolve a product reference against a catalog file and print the
    /// match.
    Resolve {
        query: String,
        /// Predicted product name, as a classifier would extract it.
        #[arg(long, default_value = "")]
        predicted: String,
        /// JSON file containing `[{ "id": ..., "name": ... }, ...]`.
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli.config)?);

    match cli.command {
        Commands::Init => init(&config).await,
        Commands::Serve => serve(config).await,
        Commands::Ask {
            question,
            chat_id,
            context,
        } => {
            let chat_id = chat_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            ask(config, &question, &chat_id, context.as_deref()).await
        }
        Commands::Classify { question } => classify(config, &question).await,
        Commands::Resolve {
            query,
            predicted,
            catalog,
        } => resolve(&config, &query, &predicted, &catalog),
    }
}

async fn init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.facts.path).await?;
    let store = SqliteFactStore::new(pool);
    store.init_schema().await?;
    println!("facts database initialized at {}", config.facts.path.display());
    Ok(())
}

/// Build the index named by the configuration.
fn build_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.index.provider.as_str() {
        "http" => Ok(Arc::new(HttpIndex::new(&config.index)?)),
        _ => Ok(Arc::new(MemoryIndex::new())),
    }
}

async fn serve(config: Arc<Config>) -> Result<()> {
    let transport = Arc::new(RedisTransport::connect(&config.redis).await?);

    let pool = db::connect(&config.facts.path).await?;
    let facts = SqliteFactStore::new(pool);
    facts.init_schema().await?;

    let collaborators = Collaborators {
        intent_embedder: Arc::from(create_embedder(&config.embedding)?),
        retrieval_embedder: Arc::from(create_embedder(&config.retrieval_embedding)?),
        index: build_index(&config)?,
        facts: Arc::new(facts),
        chat: Arc::new(OpenAiChat::new(&config.chat)?),
        context_store: transport.clone(),
        sink: transport.clone(),
    };

    let processor = Arc::new(TurnProcessor::new(config.clone(), collaborators.clone()));

    let control = {
        let processor = processor.clone();
        let transport = transport.clone();
        async move {
            transport
                .run_control_loop(move |notification| {
                    let processor = processor.clone();
                    async move {
                        let query = Query::new(
                            notification.query,
                            notification.chat_id,
                            notification.user_id,
                        );
                        tokio::spawn(async move {
                            processor.process(&query).await;
                        });
                    }
                })
                .await
        }
    };

    tokio::select! {
        result = control => result.context("control-channel subscriber stopped"),
        result = run_server(config, processor, collaborators) => result,
    }
}

/// Event sink that prints stream increments to stdout, for `anc ask`.
struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn append(&self, event: &StreamEvent) -> Result<()> {
        use std::io::Write;
        match event {
            StreamEvent::Stream { data, .. } => {
                print!("{data}");
                std::io::stdout().flush().ok();
            }
            StreamEvent::Ended { status, .. } | StreamEvent::Error { status, .. } => {
                println!("\n[{status}]");
            }
        }
        Ok(())
    }
}

async fn ask(
    config: Arc<Config>,
    question: &str,
    chat_id: &str,
    context_path: Option<&std::path::Path>,
) -> Result<()> {
    let context_store = MemoryContextStore::new();
    if let Some(path) = context_path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        context_store.insert("local", ConversationContext::from_json(&value));
    } else {
        context_store.insert("local", ConversationContext::default());
    }

    let pool = db::connect(&config.facts.path).await?;
    let facts = SqliteFactStore::new(pool);
    facts.init_schema().await?;

    let collaborators = Collaborators {
        intent_embedder: Arc::from(create_embedder(&config.embedding)?),
        retrieval_embedder: Arc::from(create_embedder(&config.retrieval_embedding)?),
        index: build_index(&config)?,
        facts: Arc::new(facts),
        chat: Arc::new(OpenAiChat::new(&config.chat)?),
        context_store: Arc::new(context_store),
        sink: Arc::new(StdoutSink),
    };

    let processor = TurnProcessor::new(config, collaborators);
    let query = Query::new(question, chat_id, "local");
    let outcome = processor.process(&query).await;
    info!(status = ?outcome.status, "turn finished");
    Ok(())
}

async fn classify(config: Arc<Config>, question: &str) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let index = build_index(&config)?;
    let chat = OpenAiChat::new(&config.chat)?;

    let classifier = IntentClassifier::new(&config, embedder.as_ref(), index.as_ref(), &chat);
    let intent = classifier.classify(question, "").await?;

    println!(
        "{}",
        serde_json::json!({
            "intent": intent.category,
            "product_name": intent.product_name,
            "properties": intent.properties,
        })
    );
    Ok(())
}

fn resolve(config: &Config, query: &str, predicted: &str, catalog_path: &std::path::Path) -> Result<()> {
    let raw = std::fs::read_to_string(catalog_path)
        .with_context(|| format!("failed to read catalog file {}", catalog_path.display()))?;
    let catalog: Vec<Product> = serde_json::from_str(&raw)?;

    let resolver = ProductResolver::new(config.resolver.clone());
    let result = resolver.resolve(query, &[], predicted, &catalog);

    println!(
        "{}",
        serde_json::json!({
            "product_name": result.product_name,
            "product_id": result.product_id,
        })
    );
    Ok(())
}
