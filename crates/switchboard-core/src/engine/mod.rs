//! Engine collaborator interface.
//!
//! An engine is the external agent runtime that actually answers prompts.
//! The registry only talks to it through these traits, so any backend (a
//! subprocess speaking JSON lines, an SDK client, a scripted fake in tests)
//! can drive the same sessions.

pub mod event;
pub mod process;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use event::{EngineEvent, Usage};
pub use process::{ProcessEngine, ProcessEngineConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine is not started")]
    NotStarted,

    #[error("Failed to start engine session: {0}")]
    SpawnFailed(String),

    #[error("Engine session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to send prompt: {0}")]
    SendFailed(String),

    #[error("Engine session is closed")]
    Closed,
}

/// Options for allocating a new engine-side session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub model: String,
    pub working_directory: Option<String>,
}

/// Live handle to one engine-side session.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Engine correlation id for this session.
    fn session_id(&self) -> &str;

    /// Submit a prompt. Returns once the engine accepted it; the response
    /// arrives as events on the session's event stream.
    async fn send(&self, prompt: &str, cancel: CancellationToken) -> Result<(), EngineError>;

    /// Release the engine-side resources. Idempotent.
    async fn dispose(&self) -> Result<(), EngineError>;
}

/// A freshly established engine session: the handle plus its event stream.
pub struct EngineConnection {
    pub handle: Arc<dyn EngineSession>,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Whether startup completed and sessions may be created.
    fn is_ready(&self) -> bool;

    async fn create_session(&self, options: SessionOptions)
        -> Result<EngineConnection, EngineError>;

    async fn resume_session(
        &self,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<EngineConnection, EngineError>;

    /// Tear the engine down. Called once, after every session was disposed.
    async fn shutdown(&self) -> Result<(), EngineError>;
}
