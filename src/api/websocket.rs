use crate::api::protocol::{AckMessage, ClientMessage, ErrorMessage, PositionMessage};
use crate::metrics::RelayMetrics;
use crate::position::{canonical_entity_id, PositionUpdate};
use crate::publisher::Publisher;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{error, info, warn};

/// Shared application state for the WebSocket fan-out handler
#[derive(Clone)]
pub struct WsAppState {
    pub publisher: Arc<Publisher>,
    pub metrics: RelayMetrics,
}

/// GET /ws/location - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create the fan-out WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/ws/location", get(ws_handler))
        .with_state(state)
}

async fn handle_socket(socket: WebSocket, state: Arc<WsAppState>) {
    let connection = RelayConnection::new(Arc::clone(&state.publisher));
    connection.handle(socket, state.metrics.clone()).await;
}

/// Manages a single fan-out WebSocket connection.
///
/// One socket multiplexes many entity topics: subscribe/unsubscribe
/// messages add and remove per-topic receivers, and updates from all
/// subscribed topics interleave onto the socket (per-topic order is
/// preserved, nothing is guaranteed across topics).
pub struct RelayConnection {
    publisher: Arc<Publisher>,

    /// Active topic receivers, keyed by canonical entity id
    topics: StreamMap<String, BroadcastStream<PositionUpdate>>,
}

impl RelayConnection {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            topics: StreamMap::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(mut self, mut socket: WebSocket, metrics: RelayMetrics) {
        metrics.increment_ws_connection();
        info!("Fan-out connection established");

        loop {
            tokio::select! {
                maybe_msg = socket.recv() => {
                    match maybe_msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_client_message(&mut socket, &text).await {
                                error!(error = %e, "Error handling client message");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Fan-out client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                Some((entity_id, item)) = self.topics.next(), if !self.topics.is_empty() => {
                    match item {
                        Ok(update) => {
                            if let Err(e) = send_position(&mut socket, update).await {
                                error!(error = %e, "Failed to send position update");
                                break;
                            }
                        }
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(entity_id = %entity_id, skipped, "Fan-out connection lagged, skipped updates");
                        }
                    }
                }
            }
        }

        metrics.decrement_ws_connection();
        info!("Fan-out connection closed");
    }

    /// Handle client message (subscribe/unsubscribe)
    async fn handle_client_message(
        &mut self,
        socket: &mut WebSocket,
        text: &str,
    ) -> anyhow::Result<()> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                let reply = ErrorMessage::new(format!("invalid message: {}", e));
                socket
                    .send(Message::Text(serde_json::to_string(&reply)?))
                    .await?;
                return Ok(());
            }
        };

        match msg {
            ClientMessage::Subscribe { entity_id } => {
                let entity_id = canonical_entity_id(&entity_id);
                info!(entity_id = %entity_id, "Client subscribed to topic");
                if !self.is_subscribed(&entity_id) {
                    let rx = self.publisher.subscribe_topic(&entity_id);
                    self.topics.insert(entity_id.clone(), BroadcastStream::new(rx));
                }
                let ack = AckMessage::subscribed(entity_id);
                socket
                    .send(Message::Text(serde_json::to_string(&ack)?))
                    .await?;
            }
            ClientMessage::Unsubscribe { entity_id } => {
                let entity_id = canonical_entity_id(&entity_id);
                info!(entity_id = %entity_id, "Client unsubscribed from topic");
                self.topics.remove(&entity_id);
                let ack = AckMessage::unsubscribed(entity_id);
                socket
                    .send(Message::Text(serde_json::to_string(&ack)?))
                    .await?;
            }
        }

        Ok(())
    }

    fn is_subscribed(&self, entity_id: &str) -> bool {
        self.topics.keys().any(|key| key == entity_id)
    }

    /// Number of topics this connection multiplexes
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

async fn send_position(socket: &mut WebSocket, update: PositionUpdate) -> anyhow::Result<()> {
    let msg = PositionMessage::from(update);
    let json = serde_json::to_string(&msg)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}
