//! Token-stream relay onto the conversation's event channel.
//!
//! This is the pipeline's only side-effecting stage. It consumes the
//! lazy token sequence produced by a generation strategy and emits
//! ordered events on the chat's channel: one `stream` event per
//! non-empty content increment, then exactly one terminal event —
//! `ended` on normal exhaustion, `error` on failure. On failure the
//! partial accumulator is discarded; the caller receives an empty
//! response with a failed status.
//!
//! The loop yields to the scheduler after each increment so concurrent
//! conversations interleave fairly on the shared runtime; this is the
//! only intentional suspension point inside the loop besides the
//! appends themselves.

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::completion::TokenStream;
use crate::transport::{EventSink, StreamEvent};

/// Status carried by the terminal `ended` event.
pub const COMPLETED_STATUS: &str = "Processing completed";
/// Status carried by the terminal `error` event.
pub const FAILED_STATUS: &str = "Processing failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Success,
    Failed,
}

/// What a relayed turn produced: the delivery status and, on success,
/// the full accumulated response text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayOutcome {
    pub status: RelayStatus,
    pub response: String,
}

impl RelayOutcome {
    pub fn success(response: String) -> Self {
        Self {
            status: RelayStatus::Success,
            response,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: RelayStatus::Failed,
            response: String::new(),
        }
    }
}

/// Relay a token sequence to the chat's channel.
///
/// Returns `Err` only when the sink itself rejects an append; errors
/// raised by the token sequence are converted into the terminal `error`
/// event and a `failed` outcome.
pub async fn relay(
    sink: &dyn EventSink,
    chat_id: &str,
    mut tokens: TokenStream,
) -> Result<RelayOutcome> {
    let mut accumulated = String::new();

    while let Some(increment) = tokens.next().await {
        match increment {
            Ok(content) => {
                if !content.is_empty() {
                    sink.append(&StreamEvent::stream(chat_id, &content)).await?;
                    accumulated.push_str(&content);
                }
                tokio::task::yield_now().await;
            }
            Err(err) => {
                warn!(chat_id, error = %err, "token stream failed mid-relay");
                sink.append(&StreamEvent::error(chat_id, FAILED_STATUS))
                    .await?;
                return Ok(RelayOutcome::failed());
            }
        }
    }

    sink.append(&StreamEvent::ended(chat_id, COMPLETED_STATUS))
        .await?;
    info!(chat_id, response_chars = accumulated.len(), "relay complete");
    Ok(RelayOutcome::success(accumulated))
}
