//! The set of open client connections.
//!
//! Each connection owns one bounded outbound channel drained by its own
//! writer task, so a slow client never holds up a broadcast. A connection
//! whose channel is full or closed is removed on the spot and its writer
//! aborted; there is no retry, no backlog beyond the channel and no replay.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Frames a connection may have queued before it counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame and stop writing.
    Close,
}

pub type OutboundSender = mpsc::Sender<Outbound>;
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

struct Connection {
    sender: OutboundSender,
    writer: JoinHandle<()>,
}

#[derive(Default)]
pub struct ConnectionSet {
    connections: DashMap<Uuid, Connection>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection and the task writing its frames.
    pub fn register(&self, id: Uuid, sender: OutboundSender, writer: JoinHandle<()>) {
        self.connections.insert(id, Connection { sender, writer });
        log::info!("Client {} connected ({} open)", id, self.connections.len());
    }

    /// Forget a connection and abort its writer. Returns false if it was
    /// already gone.
    pub fn remove(&self, id: Uuid) -> bool {
        match self.connections.remove(&id) {
            Some((_, connection)) => {
                connection.writer.abort();
                log::info!("Client {} disconnected ({} open)", id, self.connections.len());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue one frame for a single connection, dropping the connection if
    /// its channel is full or closed.
    pub fn send_to(&self, id: Uuid, sender: &OutboundSender, frame: Outbound) -> bool {
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                log_rejected(id, &e);
                self.remove(id);
                false
            }
        }
    }

    /// Queue `text` for every connection. Returns how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for entry in self.connections.iter() {
            match entry.sender.try_send(Outbound::Text(text.to_string())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log_rejected(*entry.key(), &e);
                    failed.push(*entry.key());
                }
            }
        }

        // DashMap shards stay locked while iterating.
        for id in failed {
            self.remove(id);
        }
        delivered
    }

    /// Close every connection, waiting up to `timeout` per writer.
    pub async fn close_all(&self, timeout: Duration) {
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();

        for id in ids {
            let Some((_, connection)) = self.connections.remove(&id) else {
                continue;
            };
            // A full channel still drains and ends once the sender is gone.
            let _ = connection.sender.try_send(Outbound::Close);
            drop(connection.sender);

            let abort = connection.writer.abort_handle();
            if tokio::time::timeout(timeout, connection.writer).await.is_err() {
                log::warn!("Client {} did not close within {:?}", id, timeout);
                abort.abort();
            }
        }
        self.connections.clear();
    }
}

fn log_rejected(id: Uuid, error: &TrySendError<Outbound>) {
    match error {
        TrySendError::Full(_) => log::warn!("Dropping client {}: outbound queue full", id),
        TrySendError::Closed(_) => log::debug!("Dropping client {} after failed send", id),
    }
}
