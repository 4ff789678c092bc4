//! Registry event pump and queue driver.
//!
//! One task consumes the registry's event stream, turns each event into an
//! envelope and broadcasts it. When a session finishes a turn its queue is
//! drained one prompt at a time.

use std::sync::Arc;

use switchboard_core::event_bus::EventStream;
use switchboard_core::protocol::{self, Envelope};
use switchboard_core::{RegistryEvent, SessionEvent};

use crate::state::SharedState;

pub async fn run(state: Arc<SharedState>, mut events: EventStream) {
    loop {
        let event = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            RegistryEvent::SessionsChanged => {
                broadcast(&state, &Envelope::sessions_list(&state.ctx.registry));
            }
            RegistryEvent::Session {
                session_name,
                event,
            } => {
                let turn_finished = matches!(
                    event,
                    SessionEvent::Complete { .. } | SessionEvent::Error { .. }
                );
                broadcast(&state, &Envelope::from_session_event(&session_name, event));
                if turn_finished {
                    drive_queue(&state, &session_name);
                }
            }
        }
    }
    log::debug!("Event pump stopped");
}

/// Encode once and queue for every connection.
pub fn broadcast(state: &SharedState, envelope: &Envelope) -> usize {
    match protocol::encode(envelope) {
        Ok(text) => state.connections.broadcast(&text),
        Err(e) => {
            log::error!("Failed to encode {}: {}", envelope.kind(), e);
            0
        }
    }
}

/// Start the next queued prompt of `session_name` if the session is idle.
pub fn drive_queue(state: &Arc<SharedState>, session_name: &str) {
    let Some(session) = state.ctx.registry.get_session(session_name) else {
        return;
    };
    if session.is_processing() || session.queued_messages().is_empty() {
        return;
    }

    let cancel = state.cancel.child_token();
    tokio::spawn(async move {
        if let Some(Err(e)) = session.send_next_queued(cancel).await {
            log::warn!("Queued prompt for {} failed: {}", session.name(), e);
        }
    });
}
