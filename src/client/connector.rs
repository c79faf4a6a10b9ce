//! Event connections
//!
//! A [`Connector`] opens the live event feed of one execution. The feed is
//! already listening when `connect` returns, so events published afterwards
//! are not lost.

use crate::bus::{BroadcastBus, StreamEvent, Topic};
use crate::client::ClientError;
use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::{self, PollNext, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Live events of one execution, in publication order per topic
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClientError>> + Send>>;

/// Source of live execution events
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open the event feed of `execution_id`
    async fn connect(&self, execution_id: &str) -> Result<EventStream, ClientError>;
}

/// In-process connector reading the bus directly
#[derive(Clone)]
pub struct BusConnector {
    bus: BroadcastBus,
}

impl BusConnector {
    /// Connector over a shared bus
    pub fn new(bus: BroadcastBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Connector for BusConnector {
    async fn connect(&self, execution_id: &str) -> Result<EventStream, ClientError> {
        let iterations = self
            .bus
            .subscribe(Topic::Iterations(execution_id.to_string()))
            .into_stream();
        let terminal = self
            .bus
            .subscribe(Topic::Execution(execution_id.to_string()))
            .into_stream();

        // Iteration events are published before the final status, so drain them first
        let merged = stream::select_with_strategy(iterations, terminal, |_: &mut ()| PollNext::Left)
            .map(|event| Ok::<_, ClientError>(event.as_ref().clone()));
        Ok(Box::pin(merged))
    }
}

/// Connector for the server's `/ws/executions/:id` endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    /// Connector for a server base URL (`http://`, `https://`, `ws://` or `wss://`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// WebSocket URL of an execution's event feed
    pub fn execution_url(&self, execution_id: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws/executions/{}", base, execution_id)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, execution_id: &str) -> Result<EventStream, ClientError> {
        let url = self.execution_url(execution_id);
        debug!(url = %url, "Connecting to execution feed");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        let events = stream! {
            let mut socket = socket;
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<StreamEvent>(&text) {
                        Ok(event) => {
                            yield Ok(event);
                        }
                        Err(_) => debug!(message = %text, "Ignoring non-event message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(ClientError::Transport(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(events))
    }
}
