//! WebSocket connections.
//!
//! A new client first receives the sessions list, the persisted sessions and
//! (if a session is active) that session's history, then every broadcast
//! envelope. Commands from the client are handled here; failures go back to
//! that client only.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use switchboard_core::persistence::PersistedSession;
use switchboard_core::protocol::{self, Envelope};
use switchboard_core::SessionError;
use uuid::Uuid;

use crate::connections::{outbound_channel, Outbound, OutboundReceiver, OutboundSender};
use crate::events::{broadcast, drive_queue};
use crate::state::SharedState;

/// Handler for GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SharedState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<SharedState>) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = outbound_channel();
    let peer = Peer {
        id: Uuid::new_v4(),
        tx,
        state: Arc::clone(&state),
    };

    // Queued before registering so no broadcast can overtake the snapshot.
    for envelope in snapshot(&state).await {
        peer.reply(&envelope);
    }
    let writer = tokio::spawn(write_loop(sink, rx, peer.id, Arc::clone(&state)));
    state.connections.register(peer.id, peer.tx.clone(), writer);

    loop {
        let message = tokio::select! {
            _ = state.cancel.cancelled() => break,
            // The writer is gone: the client stalled or its socket broke.
            _ = peer.tx.closed() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => handle_text(&peer, text.as_str()),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::debug!("Client {} receive error: {}", peer.id, e);
                break;
            }
        }
    }

    // On shutdown the connection set closes the socket itself.
    if !state.cancel.is_cancelled() {
        state.connections.remove(peer.id);
    }
}

/// Drain a connection's queue into its socket. A failed write removes the
/// connection from the broadcast set at once.
async fn write_loop<S>(mut sink: S, mut rx: OutboundReceiver, id: Uuid, state: Arc<SharedState>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            log::debug!("Client {} write failed", id);
            state.connections.remove(id);
            return;
        }
    }
    let _ = sink.close().await;
}

/// What a new client sees first: sessions list, persisted sessions and the
/// active session's history.
///
/// The store is read first; the live parts are built afterwards so the gap
/// between building them and registering the connection holds no await.
/// Events emitted by other tasks inside that gap still miss this client.
async fn snapshot(state: &SharedState) -> Vec<Envelope> {
    let persisted = match persisted_sessions(state).await {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Failed to list persisted sessions: {}", e);
            Vec::new()
        }
    };

    let registry = &state.ctx.registry;
    let mut envelopes = vec![
        Envelope::sessions_list(registry),
        Envelope::persisted_sessions(persisted),
    ];
    if let Some(active) = registry.get_active_session() {
        envelopes.push(Envelope::history(&active));
    }
    envelopes
}

/// Read the persisted index on the blocking pool.
async fn persisted_sessions(state: &SharedState) -> Result<Vec<PersistedSession>, SessionError> {
    let registry = Arc::clone(&state.ctx.registry);
    tokio::task::spawn_blocking(move || registry.get_persisted_sessions())
        .await
        .map_err(|e| SessionError::Store(e.to_string()))?
}

/// One client connection as seen by command handlers.
#[derive(Clone)]
struct Peer {
    id: Uuid,
    tx: OutboundSender,
    state: Arc<SharedState>,
}

impl Peer {
    fn reply(&self, envelope: &Envelope) {
        match protocol::encode(envelope) {
            Ok(text) => {
                self.state
                    .connections
                    .send_to(self.id, &self.tx, Outbound::Text(text));
            }
            Err(e) => log::error!("Failed to encode {}: {}", envelope.kind(), e),
        }
    }

    fn reply_error(&self, error: &SessionError, session_name: Option<&str>) {
        self.reply(&Envelope::error(
            error.to_string(),
            session_name.map(str::to_string),
        ));
    }
}

fn handle_text(peer: &Peer, text: &str) {
    match protocol::decode(text) {
        Ok(Some(envelope)) => handle_command(peer, envelope),
        Ok(None) => {}
        Err(e) => {
            log::debug!("Rejected client message: {}", e);
            peer.reply(&Envelope::error(format!("Invalid message: {e}"), None));
        }
    }
}

fn handle_command(peer: &Peer, envelope: Envelope) {
    let state = &peer.state;
    let registry = &state.ctx.registry;

    match envelope {
        Envelope::GetSessions => peer.reply(&Envelope::sessions_list(registry)),

        Envelope::GetHistory(payload) => match registry.require_session(&payload.session_name) {
            Ok(session) => peer.reply(&Envelope::history(&session)),
            Err(e) => peer.reply_error(&e, Some(&payload.session_name)),
        },

        Envelope::SendMessage(payload) => {
            let session = match registry.require_session(&payload.session_name) {
                Ok(session) => session,
                Err(e) => return peer.reply_error(&e, Some(&payload.session_name)),
            };
            let peer = peer.clone();
            let cancel = state.cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = session.send_prompt(&payload.text, cancel).await {
                    if !e.is_broadcast() {
                        peer.reply_error(&e, Some(session.name()));
                    }
                }
            });
        }

        Envelope::QueueMessage(payload) => match registry.require_session(&payload.session_name) {
            Ok(session) => {
                session.enqueue_message(payload.text);
                drive_queue(state, session.name());
            }
            Err(e) => peer.reply_error(&e, Some(&payload.session_name)),
        },

        Envelope::CreateSession(payload) => {
            let peer = peer.clone();
            tokio::spawn(async move {
                let result = peer
                    .state
                    .ctx
                    .registry
                    .create_session(
                        &payload.session_name,
                        &payload.model,
                        payload.working_directory,
                    )
                    .await;
                if let Err(e) = result {
                    peer.reply_error(&e, Some(&payload.session_name));
                }
            });
        }

        Envelope::ResumeSession(payload) => {
            let peer = peer.clone();
            tokio::spawn(async move {
                let result = peer
                    .state
                    .ctx
                    .registry
                    .resume_session(&payload.session_id, payload.display_name.as_deref())
                    .await;
                if let Err(e) = result {
                    peer.reply_error(&e, payload.display_name.as_deref());
                }
            });
        }

        Envelope::SwitchSession(payload) => {
            if registry.switch_session(&payload.session_name) {
                if let Some(session) = registry.get_session(&payload.session_name) {
                    peer.reply(&Envelope::history(&session));
                }
            } else {
                let error = SessionError::NotFound(payload.session_name.clone());
                peer.reply_error(&error, Some(&payload.session_name));
            }
        }

        Envelope::CloseSession(payload) => {
            let peer = peer.clone();
            tokio::spawn(async move {
                if let Err(e) = peer.state.ctx.registry.close_session(&payload.session_name).await {
                    peer.reply_error(&e, Some(&payload.session_name));
                }
            });
        }

        Envelope::ClearHistory(payload) => match registry.require_session(&payload.session_name) {
            Ok(session) => {
                session.clear_history();
                broadcast(state, &Envelope::history(&session));
            }
            Err(e) => peer.reply_error(&e, Some(&payload.session_name)),
        },

        Envelope::GetPersistedSessions => {
            let peer = peer.clone();
            tokio::spawn(async move {
                match persisted_sessions(&peer.state).await {
                    Ok(records) => peer.reply(&Envelope::persisted_sessions(records)),
                    Err(e) => peer.reply_error(&e, None),
                }
            });
        }

        other => {
            log::debug!("Ignoring server-only message {} from client", other.kind());
        }
    }
}
