//! WebSocket `newHeads` subscription against one active node.
//!
//! Grounded on the teacher's `qc-tui` WebSocket client: subscription-id
//! tracking to filter the confirmation reply out of the notification
//! stream, and hex-number parsing. Unlike that client, this source does
//! not reconnect itself — on any error it returns `HeadStreamInterrupted`
//! and lets the Chain Pipeline decide whether to retry the same node or
//! fail over (SPEC_FULL.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shared_bus::{EventPublisher as _, InMemoryEventBus, PipelineEvent};
use shared_types::{HeadEvent, IngestError};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Read deadline refreshed after every message; a miss is treated as an
/// interrupted stream.
const READ_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: [&'static str; 1],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcMessage {
    id: Option<u64>,
    result: Option<String>,
    method: Option<String>,
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    subscription: String,
    result: NewHeadResult,
}

#[derive(Debug, Deserialize)]
struct NewHeadResult {
    hash: String,
    #[serde(rename = "parentHash")]
    parent_hash: String,
    number: String,
    timestamp: String,
}

/// Streams `HeadEvent`s from one node's `newHeads` subscription, fanning
/// each one out on the internal bus (`EventTopic::HeadStream`) in addition
/// to forwarding it downstream to the Block Fetcher pool.
pub struct HeadSource {
    node_id: String,
    wss_url: String,
    internal_bus: Arc<InMemoryEventBus>,
}

impl HeadSource {
    pub fn new(node_id: impl Into<String>, wss_url: impl Into<String>, internal_bus: Arc<InMemoryEventBus>) -> Self {
        Self {
            node_id: node_id.into(),
            wss_url: wss_url.into(),
            internal_bus,
        }
    }

    /// Run the subscription until cancelled or interrupted. `Ok(())` means
    /// clean cancellation; any other outcome is a `HeadStreamInterrupted`.
    pub async fn run(&self, tx: mpsc::Sender<HeadEvent>, cancel: CancellationToken) -> Result<(), IngestError> {
        let (ws_stream, _) = connect_async(&self.wss_url).await.map_err(|e| IngestError::HeadStreamInterrupted {
            node_id: self.node_id.clone(),
            reason: format!("connect failed: {e}"),
        })?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = SubscribeRequest {
            jsonrpc: "2.0",
            method: "eth_subscribe",
            params: ["newHeads"],
            id: 1,
        };
        let payload = serde_json::to_string(&subscribe).map_err(|e| IngestError::HeadStreamInterrupted {
            node_id: self.node_id.clone(),
            reason: e.to_string(),
        })?;
        write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| IngestError::HeadStreamInterrupted {
                node_id: self.node_id.clone(),
                reason: format!("subscribe send failed: {e}"),
            })?;

        let mut subscription_id: Option<String> = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = tokio::time::timeout(READ_DEADLINE, read.next()) => res,
            };

            let msg = match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    return Err(IngestError::HeadStreamInterrupted {
                        node_id: self.node_id.clone(),
                        reason: format!("read error: {e}"),
                    })
                }
                Ok(None) => {
                    return Err(IngestError::HeadStreamInterrupted {
                        node_id: self.node_id.clone(),
                        reason: "connection closed".to_string(),
                    })
                }
                Err(_elapsed) => {
                    return Err(IngestError::HeadStreamInterrupted {
                        node_id: self.node_id.clone(),
                        reason: "read deadline exceeded".to_string(),
                    })
                }
            };

            match msg {
                Message::Text(text) => {
                    if let Some(event) = self.handle_text(&text, &mut subscription_id) {
                        self.internal_bus.publish(PipelineEvent::HeadReceived(event.clone())).await;
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Message::Ping(data) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Message::Close(_) => {
                    return Err(IngestError::HeadStreamInterrupted {
                        node_id: self.node_id.clone(),
                        reason: "peer closed connection".to_string(),
                    })
                }
                _ => {}
            }
        }
    }

    fn handle_text(&self, text: &str, subscription_id: &mut Option<String>) -> Option<HeadEvent> {
        let parsed: RpcMessage = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => {
                warn!(node_id = %self.node_id, error = %e, "malformed websocket message, skipping");
                return None;
            }
        };

        // Subscription confirmation: carries a result but not a notification.
        if parsed.id == Some(1) {
            if let Some(result) = parsed.result {
                debug!(node_id = %self.node_id, subscription = %result, "newHeads subscription confirmed");
                *subscription_id = Some(result);
            }
            return None;
        }

        if parsed.method.as_deref() != Some("eth_subscription") {
            return None;
        }
        let params = parsed.params?;
        if subscription_id.as_deref() != Some(params.subscription.as_str()) {
            return None;
        }

        let block_number = parse_hex_u64(&params.result.number)?;
        let block_timestamp = parse_hex_u64(&params.result.timestamp)?;

        Some(HeadEvent {
            block_hash: params.result.hash.to_lowercase(),
            parent_hash: params.result.parent_hash.to_lowercase(),
            block_number,
            block_timestamp,
            source_node_id: self.node_id.clone(),
        })
    }
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}
