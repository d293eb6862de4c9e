pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{ClientEvent, GameClient};
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::server::AppState;
use crate::state::Session;
use crate::types::*;

const LOG_TARGET: &str = "genuine::ws";
const EVENT_BUFFER: usize = 64;

/// Per-socket state: who this connection plays as, and the replica following its lobby
pub struct Connection {
    pub id: String,
    /// Stands in for an authenticated user until accounts exist
    pub user_id: String,
    pub participant: Option<Participant>,
    replica: Option<JoinHandle<()>>,
    events: Option<mpsc::Receiver<ClientEvent>>,
}

impl Connection {
    pub fn new() -> Self {
        let id = ulid::Ulid::new().to_string();
        Self {
            user_id: format!("user-{}", id),
            id,
            participant: None,
            replica: None,
            events: None,
        }
    }

    /// Start a replica for the participant's lobby; its events arrive on a fresh channel
    pub fn follow(&mut self, session: &Session, participant: Participant) {
        self.detach();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let client = GameClient::new(session.clone(), participant.lobby_id.clone(), tx);
        self.replica = Some(client.spawn());
        self.events = Some(rx);
        self.participant = Some(participant);
    }

    /// Stop following the lobby, returning who we were
    pub fn detach(&mut self) -> Option<Participant> {
        if let Some(replica) = self.replica.take() {
            replica.abort();
        }
        self.events = None;
        self.participant.take()
    }

    async fn next_event(&mut self) -> Option<ClientEvent> {
        match &mut self.events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(replica) = self.replica.take() {
            replica.abort();
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(target: LOG_TARGET, "Failed to serialize message: {}", e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::new();

    tracing::info!(target: LOG_TARGET, connection_id = %conn.id, "WebSocket connected");

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        connection_id: conn.id.clone(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_json(&mut sender, &welcome).await {
        tracing::error!(target: LOG_TARGET, "Failed to send welcome message");
        return;
    }

    loop {
        tokio::select! {
            // View updates from this connection's replica
            event = conn.next_event() => {
                let Some(event) = event else {
                    // Replica ended without closing the lobby
                    conn.detach();
                    continue;
                };
                let closed = matches!(event, ClientEvent::LobbyClosed);
                let viewer = conn.participant.as_ref().map(|p| p.id.clone());
                let msg = ServerMessage::from_event(event, viewer.as_deref());
                if !send_json(&mut sender, &msg).await {
                    break;
                }
                if closed {
                    conn.detach();
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(target: LOG_TARGET, connection_id = %conn.id, "Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &mut conn, &state).await
                                {
                                    if !send_json(&mut sender, &response).await {
                                        tracing::error!(target: LOG_TARGET, "Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(target: LOG_TARGET, "Failed to parse client message: {}", e);
                                let error = ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                );
                                let _ = send_json(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(target: LOG_TARGET, connection_id = %conn.id, "WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(target: LOG_TARGET, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // A vanished player would otherwise hold up every phase
    if let Some(participant) = conn.detach() {
        if let Err(e) = state.session.leave_lobby(&participant.id).await {
            tracing::warn!(target: LOG_TARGET, participant_id = %participant.id, "Leave on disconnect failed: {}", e);
        }
    }

    tracing::info!(target: LOG_TARGET, connection_id = %conn.id, "WebSocket connection closed");
}
