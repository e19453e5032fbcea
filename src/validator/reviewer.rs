//! Reviewer Channel
//!
//! Single-slot WebSocket connection to a human reviewer. At most one reviewer
//! is connected and at most one query is outstanding; a new connection
//! replaces the old one and fails whatever it was waiting on.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Transport-level failures of a reviewer round-trip
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReviewerError {
    #[error("Reviewer not connected")]
    NotConnected,

    #[error("Reviewer connection closed")]
    Closed,

    #[error("Reviewer did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Invalid reviewer message: {0}")]
    InvalidMessage(String),
}

/// The reviewer answered a different transaction than the one asked about
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Reviewer response id {received} does not match transaction {expected}")]
pub struct ProtocolError {
    pub expected: String,
    pub received: String,
}

/// Message sent back by the reviewer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewerResponse {
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type Responder = oneshot::Sender<Result<ReviewerResponse, ReviewerError>>;

#[derive(Debug)]
struct Connection {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Debug)]
struct Pending {
    query_id: u64,
    responder: Responder,
}

#[derive(Debug, Default)]
struct ChannelState {
    connection: Option<Connection>,
    pending: Option<Pending>,
}

impl ChannelState {
    fn fail_pending(&mut self, error: ReviewerError) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.responder.send(Err(error));
        }
    }
}

/// Result of trying to send a query
#[derive(Debug)]
pub enum Dispatch {
    Disconnected,
    Busy,
    Sent(QueryTicket),
}

/// Handle on an outstanding query; dropping it frees the channel
#[derive(Debug)]
pub struct QueryTicket {
    channel: Arc<ReviewerChannel>,
    query_id: u64,
    receiver: Option<oneshot::Receiver<Result<ReviewerResponse, ReviewerError>>>,
}

impl QueryTicket {
    /// Wait for the reviewer's answer
    pub async fn wait(mut self, timeout: Duration) -> Result<ReviewerResponse, ReviewerError> {
        let receiver = self.receiver.take().ok_or(ReviewerError::Closed)?;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReviewerError::Closed),
            Err(_) => Err(ReviewerError::Timeout(timeout)),
        }
    }
}

impl Drop for QueryTicket {
    fn drop(&mut self) {
        self.channel.release(self.query_id);
    }
}

/// Connection slot and busy flag, updated under one lock
#[derive(Debug, Default)]
pub struct ReviewerChannel {
    state: Mutex<ChannelState>,
    next_connection: AtomicU64,
    next_query: AtomicU64,
}

impl ReviewerChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.lock().connection.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Send a query if a reviewer is connected and idle
    ///
    /// The check and the transition to busy happen under the same lock, so two
    /// callers can never both observe an idle channel.
    pub fn dispatch(self: &Arc<Self>, message: String) -> Dispatch {
        let mut state = self.lock();
        let Some(connection) = state.connection.as_ref() else {
            return Dispatch::Disconnected;
        };
        if state.pending.is_some() {
            return Dispatch::Busy;
        }
        if connection.outbound.send(message).is_err() {
            state.connection = None;
            return Dispatch::Disconnected;
        }

        let query_id = self.next_query.fetch_add(1, Ordering::SeqCst) + 1;
        let (responder, receiver) = oneshot::channel();
        state.pending = Some(Pending {
            query_id,
            responder,
        });

        Dispatch::Sent(QueryTicket {
            channel: Arc::clone(self),
            query_id,
            receiver: Some(receiver),
        })
    }

    /// Install a new reviewer connection, replacing any existing one
    ///
    /// # Returns
    /// The connection id and the stream of messages to write to the socket
    pub fn attach(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst) + 1;

        let mut state = self.lock();
        if let Some(previous) = state.connection.replace(Connection { id, outbound }) {
            info!(previous = previous.id, current = id, "Replacing reviewer connection");
        } else {
            info!(connection = id, "Reviewer connected");
        }
        state.fail_pending(ReviewerError::Closed);

        (id, receiver)
    }

    /// Remove a connection if it is still the current one
    pub fn detach(&self, connection_id: u64) {
        let mut state = self.lock();
        if state.connection.as_ref().map(|c| c.id) != Some(connection_id) {
            return;
        }
        state.connection = None;
        state.fail_pending(ReviewerError::Closed);
        info!(connection = connection_id, "Reviewer disconnected");
    }

    /// Route an inbound text frame to the outstanding query
    pub fn handle_message(&self, connection_id: u64, text: &str) {
        let mut state = self.lock();
        if state.connection.as_ref().map(|c| c.id) != Some(connection_id) {
            debug!(connection = connection_id, "Message from replaced reviewer ignored");
            return;
        }
        let Some(pending) = state.pending.take() else {
            warn!("Unsolicited reviewer message ignored");
            return;
        };

        let parsed = serde_json::from_str::<ReviewerResponse>(text)
            .map_err(|e| ReviewerError::InvalidMessage(e.to_string()));
        let _ = pending.responder.send(parsed);
    }

    /// Drop the reviewer and fail any outstanding query
    pub fn close(&self) {
        let mut state = self.lock();
        state.connection = None;
        state.fail_pending(ReviewerError::Closed);
    }

    fn release(&self, query_id: u64) {
        let mut state = self.lock();
        if state.pending.as_ref().map(|p| p.query_id) == Some(query_id) {
            state.pending = None;
        }
    }
}

/// Router serving the reviewer WebSocket on `/`
pub fn router(channel: Arc<ReviewerChannel>) -> Router {
    Router::new()
        .route("/", any(ws_handler))
        .with_state(channel)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(channel): State<Arc<ReviewerChannel>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, channel))
}

async fn handle_socket(socket: WebSocket, channel: Arc<ReviewerChannel>) {
    let (connection_id, mut outbound) = channel.attach();
    let (mut sink, mut stream) = socket.split();

    // ends when the connection is replaced or detached
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => channel.handle_message(connection_id, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection = connection_id, error = %e, "Reviewer socket error");
                break;
            }
        }
    }

    channel.detach(connection_id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str, result: bool) -> String {
        serde_json::to_string(&ReviewerResponse {
            id: id.to_string(),
            timestamp: Some(1),
            result,
            message: None,
        })
        .unwrap()
    }

    // ==================== dispatch tests ====================

    #[tokio::test]
    async fn test_dispatch_without_reviewer() {
        let channel = ReviewerChannel::new();
        assert!(matches!(channel.dispatch("{}".into()), Dispatch::Disconnected));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let channel = ReviewerChannel::new();
        let (conn, mut outbound) = channel.attach();

        let Dispatch::Sent(ticket) = channel.dispatch("query".into()) else {
            panic!("expected query to be sent");
        };
        assert_eq!(outbound.recv().await.as_deref(), Some("query"));
        assert!(channel.is_busy());

        channel.handle_message(conn, &response("0xabc", true));
        let answer = ticket.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(answer.id, "0xabc");
        assert!(answer.result);
        assert!(!channel.is_busy());
    }

    #[tokio::test]
    async fn test_second_dispatch_is_busy() {
        let channel = ReviewerChannel::new();
        let (_conn, _outbound) = channel.attach();

        let first = channel.dispatch("one".into());
        assert!(matches!(first, Dispatch::Sent(_)));
        assert!(matches!(channel.dispatch("two".into()), Dispatch::Busy));

        drop(first);
        assert!(!channel.is_busy());
        assert!(matches!(channel.dispatch("three".into()), Dispatch::Sent(_)));
    }

    #[tokio::test]
    async fn test_timeout_releases_channel() {
        let channel = ReviewerChannel::new();
        let (_conn, _outbound) = channel.attach();

        let Dispatch::Sent(ticket) = channel.dispatch("query".into()) else {
            panic!("expected query to be sent");
        };
        let err = ticket.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ReviewerError::Timeout(_)));
        assert!(!channel.is_busy());
        assert!(channel.is_active());
    }

    #[tokio::test]
    async fn test_invalid_message_fails_query() {
        let channel = ReviewerChannel::new();
        let (conn, _outbound) = channel.attach();

        let Dispatch::Sent(ticket) = channel.dispatch("query".into()) else {
            panic!("expected query to be sent");
        };
        channel.handle_message(conn, "not json");
        let err = ticket.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ReviewerError::InvalidMessage(_)));
    }

    // ==================== connection slot tests ====================

    #[tokio::test]
    async fn test_replacement_fails_pending_and_clears_busy() {
        let channel = ReviewerChannel::new();
        let (first, mut first_outbound) = channel.attach();

        let Dispatch::Sent(ticket) = channel.dispatch("query".into()) else {
            panic!("expected query to be sent");
        };
        let (second, _second_outbound) = channel.attach();
        assert_ne!(first, second);
        assert!(!channel.is_busy());

        let err = ticket.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, ReviewerError::Closed);

        // old writer sees its stream end after the queued message
        assert_eq!(first_outbound.recv().await.as_deref(), Some("query"));
        assert!(first_outbound.recv().await.is_none());

        // messages from the replaced socket are ignored
        let Dispatch::Sent(ticket) = channel.dispatch("again".into()) else {
            panic!("expected query to be sent");
        };
        channel.handle_message(first, &response("0x1", false));
        assert!(channel.is_busy());
        channel.handle_message(second, &response("0x1", false));
        assert!(!ticket.wait(Duration::from_secs(1)).await.unwrap().result);
    }

    #[tokio::test]
    async fn test_detach_only_current_connection() {
        let channel = ReviewerChannel::new();
        let (first, _a) = channel.attach();
        let (_second, _b) = channel.attach();

        channel.detach(first);
        assert!(channel.is_active());

        channel.close();
        assert!(!channel.is_active());
    }

    #[test]
    fn test_response_parsing_without_optional_fields() {
        let parsed: ReviewerResponse = serde_json::from_str(r#"{"id":"0x1","result":true}"#).unwrap();
        assert!(parsed.result);
        assert!(parsed.message.is_none());
        assert!(parsed.timestamp.is_none());
    }
}
