//! WebSocket handlers for live execution progress
//!
//! A client connects to `/ws/executions/:id` and receives every bus event of
//! that execution as a JSON text message: iteration events first, then one
//! final `{status}` message, after which the server closes the socket.
//! Supports ping/pong for connection keepalive.

use crate::api::utils::require_execution;
use crate::bus::{BusSubscription, FinalStatus, StreamEvent, Topic};
use crate::error::AppError;
use crate::state::AppState;
use crate::store::models::ExecutionId;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Keepalive ping period
pub const PING_INTERVAL_SECS: u64 = 30;

/// Control messages a client may send
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Application-level keepalive
    Ping,
    /// Reply to `Ping`
    Pong,
}

/// WebSocket upgrade handler
///
/// Subscribes to both topics of the execution before the upgrade completes,
/// so nothing published after the handshake is missed. The subscriptions are
/// released again when the execution turns out not to exist.
///
/// # Returns
/// * `Response` - HTTP response initiating the WebSocket connection
/// * `Err(AppError)` - 404 when the execution does not exist
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<ExecutionId>,
) -> Result<Response, AppError> {
    let iterations = state.bus.subscribe(Topic::Iterations(id.clone()));
    let terminal = state.bus.subscribe(Topic::Execution(id.clone()));

    // Read after subscribing: a run that already finished will never publish again
    let execution = require_execution(&state, &id).await?;
    let already_final = execution.is_finished().then_some(FinalStatus {
        status: execution.status,
    });

    let subscription = SocketSubscription {
        execution_id: id,
        iterations,
        terminal,
        already_final,
        queue_capacity: state.config.bus.socket_queue_capacity,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

// Everything a socket task needs once the upgrade completes
struct SocketSubscription {
    execution_id: ExecutionId,
    iterations: BusSubscription,
    terminal: BusSubscription,
    already_final: Option<FinalStatus>,
    queue_capacity: usize,
}

/// Result of queueing one outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queued {
    Sent,
    /// The client stopped reading and its queue is full
    Full,
    /// The send task is gone
    Closed,
}

// How the event forwarder stopped
enum Forwarded {
    Finished,
    Lagged,
}

// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, subscription: SocketSubscription) {
    let SocketSubscription {
        execution_id,
        mut iterations,
        mut terminal,
        already_final,
        queue_capacity,
    } = subscription;
    let (mut sender, mut receiver) = socket.split();

    info!(execution_id = %execution_id, "WebSocket client connected");

    // Bounded so a client that stops reading cannot grow server memory
    let (tx, mut rx) = mpsc::channel::<Message>(queue_capacity.max(1));

    // Task to forward messages from channel to sender
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Task to forward bus events, ending with the final status
    let event_tx = tx.clone();
    let forward_id = execution_id.clone();
    let mut forward_task = tokio::spawn(async move {
        if let Some(status) = already_final {
            if send_event(&event_tx, &StreamEvent::Final(status)) == Queued::Full {
                return Forwarded::Lagged;
            }
            let _ = event_tx.send(Message::Close(None)).await;
            return Forwarded::Finished;
        }

        let mut iterations_open = true;
        loop {
            // Iteration events are published before the final status, so drain them first
            let event = tokio::select! {
                biased;
                event = iterations.recv(), if iterations_open => match event {
                    Some(event) => event,
                    None => {
                        iterations_open = false;
                        continue;
                    }
                },
                event = terminal.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!(execution_id = %forward_id, "Bus topic closed before final status");
                        break;
                    }
                },
            };
            match send_event(&event_tx, &event) {
                Queued::Sent => {}
                Queued::Full => {
                    warn!(
                        execution_id = %forward_id,
                        capacity = queue_capacity,
                        "WebSocket client is not reading, closing connection"
                    );
                    return Forwarded::Lagged;
                }
                Queued::Closed => return Forwarded::Finished,
            }
            if let StreamEvent::Final(final_status) = event.as_ref() {
                debug!(execution_id = %forward_id, status = %final_status.status, "Final status forwarded");
                break;
            }
        }
        let _ = event_tx.send(Message::Close(None)).await;
        Forwarded::Finished
    });

    // Task to send periodic pings
    let ping_tx = tx.clone();
    let mut ping_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(PING_INTERVAL_SECS)).await;
            if ping_tx.send(Message::Ping(vec![])).await.is_err() {
                break;
            }
        }
    });

    // Receive messages
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(ControlMessage::Ping) => {
                        if let Ok(pong) = serde_json::to_string(&ControlMessage::Pong) {
                            if tx.send(Message::Text(pong)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(other) => warn!("Received unhandled WebSocket message: {:?}", other),
                    Err(_) => debug!("Ignoring unrecognised client message"),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket client disconnected");
                    break;
                }
                Ok(Message::Pong(_)) => {
                    // Client responded to ping
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for the socket to close from either side
    tokio::select! {
        _ = &mut send_task => {
            ping_task.abort();
            recv_task.abort();
        }
        _ = &mut ping_task => {
            send_task.abort();
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            ping_task.abort();
        }
        forwarded = &mut forward_task => {
            if matches!(forwarded, Ok(Forwarded::Lagged)) {
                send_task.abort();
            } else {
                // Let the queued events and the close frame go out
                let _ = (&mut send_task).await;
            }
            ping_task.abort();
            recv_task.abort();
        }
    }
    forward_task.abort();

    info!(execution_id = %execution_id, "WebSocket connection closed");
}

// Serialize and queue one event without waiting for queue space
fn send_event(tx: &mpsc::Sender<Message>, event: &StreamEvent) -> Queued {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return Queued::Sent;
        }
    };
    match tx.try_send(Message::Text(json)) {
        Ok(()) => Queued::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Queued::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Queued::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_messages() {
        let ping: ControlMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ControlMessage::Ping);
        assert_eq!(
            serde_json::to_string(&ControlMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
    }

    fn completed() -> StreamEvent {
        StreamEvent::Final(FinalStatus {
            status: crate::store::ExecutionStatus::Completed,
        })
    }

    #[test]
    fn test_send_event_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(4);
        assert_eq!(send_event(&tx, &completed()), Queued::Sent);
        drop(rx);
        assert_eq!(send_event(&tx, &completed()), Queued::Closed);
    }

    #[test]
    fn test_send_event_never_grows_past_capacity() {
        let (tx, mut rx) = mpsc::channel(2);
        assert_eq!(send_event(&tx, &completed()), Queued::Sent);
        assert_eq!(send_event(&tx, &completed()), Queued::Sent);
        assert_eq!(send_event(&tx, &completed()), Queued::Full);

        // Space frees up once the writer drains a message
        assert!(rx.try_recv().is_ok());
        assert_eq!(send_event(&tx, &completed()), Queued::Sent);
    }
}
