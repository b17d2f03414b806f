//! # Annuity Chat
//!
//! An intent-routed retrieval and streaming answer service for annuity
//! product questions. A turn flows through five stages:
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌─────────┐
//! │  Intent     │──▶│  Product   │──▶│  Context   │──▶│  Answer    │──▶│  Relay   │
//! │  classify   │   │  resolve   │   │  assemble  │   │  generate  │   │  stream  │
//! └────────────┘   └───────────┘   └───────────┘   └───────────┘   └─────────┘
//! ```
//!
//! The classifier routes each question to one of two strategies: a
//! product-grounded path that resolves the product reference against
//! the catalog, fetches structured facts, and builds deduplicated
//! citation context, or a general-FAQ path that answers from a
//! domain-restricted prompt alone. Either way the model's token stream
//! is relayed as ordered events on the conversation's Redis channel,
//! ending in exactly one terminal event.
//!
//! Every stage is pure or reaches the outside world through an injected
//! trait (`EmbeddingClient`, `VectorIndex`, `FactStore`, `ChatModel`,
//! `ContextStore`, `EventSink`), so the whole pipeline runs against
//! in-memory collaborators in tests.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`intent`] | Few-shot intent classification |
//! | [`similarity`] | String-similarity scorers |
//! | [`resolver`] | Staged product-name resolution |
//! | [`context`] | Citation-context assembly |
//! | [`generate`] | FAQ / product-grounded strategies |
//! | [`relay`] | Token-stream relay with terminal events |
//! | [`pipeline`] | Turn orchestration and composition root |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat-completion client and SSE decoding |
//! | [`index`] | Vector-index clients |
//! | [`facts`] | Structured product-fact store |
//! | [`transport`] | Stream events, Redis transport, context store |
//! | [`server`] | HTTP surface |

pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod facts;
pub mod generate;
pub mod index;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod similarity;
pub mod transport;
