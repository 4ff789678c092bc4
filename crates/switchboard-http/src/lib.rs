//! WebSocket bridge between remote clients and the session registry.
//!
//! Clients connect to `/ws`, receive a snapshot of the registry, then
//! exchange [`Envelope`](switchboard_core::protocol::Envelope) messages.
//! Every session event is broadcast to every open connection.

mod auth;
mod connections;
mod events;
mod routes;
mod state;
mod websocket;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::AppContext;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use connections::{ConnectionSet, Outbound};
pub use state::SharedState;

pub const DEFAULT_PORT: u16 = 7777;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("The registry event stream was already taken")]
    EventStreamTaken,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub port: u16,
    /// Shared secret for `/ws`. `None` disables authentication.
    pub token: Option<String>,
    /// Serve the secret on `/token` for local clients.
    pub serve_token_endpoint: bool,
    /// Per-connection wait when closing connections at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            token: None,
            serve_token_endpoint: true,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Handle to a running bridge.
pub struct BridgeHandle {
    state: Arc<SharedState>,
    local_addr: SocketAddr,
    server: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Stop accepting, close every connection and wait for the server.
    ///
    /// Each wait is bounded by the configured shutdown timeout; a slow peer
    /// never blocks shutdown.
    pub async fn stop(&mut self) {
        let Some(server) = self.server.take() else {
            return;
        };
        log::info!("Bridge shutting down");

        let timeout = self.state.config.shutdown_timeout;
        self.state.cancel.cancel();
        self.state.connections.close_all(timeout).await;

        let abort = server.abort_handle();
        if tokio::time::timeout(timeout, server).await.is_err() {
            log::warn!("Bridge server did not stop within {:?}", timeout);
            abort.abort();
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

/// Bind all interfaces, falling back to loopback.
async fn bind(port: u16) -> Result<TcpListener, BridgeError> {
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            log::warn!("Failed to bind 0.0.0.0:{}: {}; trying loopback", port, e);
            TcpListener::bind((Ipv4Addr::LOCALHOST, port))
                .await
                .map_err(|source| BridgeError::Bind { port, source })
        }
    }
}

/// Start the bridge for `ctx`.
///
/// Takes the registry's event stream, so only one bridge can serve a
/// registry. Must be called inside a tokio runtime.
pub async fn start(ctx: AppContext, config: BridgeConfig) -> Result<BridgeHandle, BridgeError> {
    let events = ctx
        .registry
        .take_event_stream()
        .ok_or(BridgeError::EventStreamTaken)?;

    let listener = bind(config.port).await?;
    let local_addr = listener.local_addr()?;

    let cancel = CancellationToken::new();
    let state = Arc::new(SharedState::new(ctx, config, cancel.clone()));
    let pump = tokio::spawn(events::run(Arc::clone(&state), events));

    let app = routes::router(Arc::clone(&state));
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            log::error!("Bridge server failed: {}", e);
        }
    });

    log::info!("Bridge listening on ws://{}/ws", local_addr);

    Ok(BridgeHandle {
        state,
        local_addr,
        server: Some(server),
        pump: Some(pump),
    })
}
