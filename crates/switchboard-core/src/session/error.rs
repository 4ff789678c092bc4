use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session name cannot be empty")]
    EmptyName,

    #[error("Session id cannot be empty")]
    EmptyId,

    #[error("A session named '{0}' already exists")]
    DuplicateName(String),

    #[error("Engine session {session_id} is already open as '{name}'")]
    AlreadyOpen { session_id: String, name: String },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Engine connection is not initialized")]
    NotInitialized,

    #[error("Session '{0}' is already processing a prompt")]
    AlreadyProcessing(String),

    #[error("Session '{0}' is closed")]
    Closed(String),

    #[error("Prompt was cancelled")]
    Cancelled,

    #[error("Turn failed: {0}")]
    TurnFailed(String),

    #[error("Failed to read persisted sessions: {0}")]
    Store(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    /// Turn failures every client already learned about through a broadcast
    /// `session_error` event. Only meaningful for `send_prompt` results.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            SessionError::TurnFailed(_) | SessionError::Engine(_) | SessionError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_displays_name() {
        let error = SessionError::DuplicateName("main".to_string());
        assert!(error.to_string().contains("'main'"));
    }

    #[test]
    fn engine_error_is_transparent() {
        let error = SessionError::from(EngineError::SendFailed("broken pipe".to_string()));
        assert_eq!(error.to_string(), "Failed to send prompt: broken pipe");
    }

    #[test]
    fn broadcast_classification() {
        assert!(SessionError::TurnFailed("x".to_string()).is_broadcast());
        assert!(SessionError::Cancelled.is_broadcast());
        assert!(!SessionError::AlreadyProcessing("main".to_string()).is_broadcast());
        assert!(!SessionError::NotFound("main".to_string()).is_broadcast());
    }
}
