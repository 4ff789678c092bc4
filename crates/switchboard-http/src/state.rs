//! Shared state for the bridge handlers.

use switchboard_core::AppContext;
use tokio_util::sync::CancellationToken;

use crate::connections::ConnectionSet;
use crate::BridgeConfig;

/// Shared state available to all handlers and the event pump.
pub struct SharedState {
    pub ctx: AppContext,
    pub config: BridgeConfig,
    pub connections: ConnectionSet,
    /// Cancelled once when the bridge stops.
    pub cancel: CancellationToken,
}

impl SharedState {
    pub fn new(ctx: AppContext, config: BridgeConfig, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            config,
            connections: ConnectionSet::new(),
            cancel,
        }
    }

    /// Check a presented secret. Always true when no token is configured.
    pub fn validate_token(&self, presented: Option<&str>) -> bool {
        match self.config.token.as_deref() {
            None => true,
            Some(expected) => presented == Some(expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchboard_core::engine::testing::ScriptedEngine;

    fn state(token: Option<&str>) -> SharedState {
        let ctx = AppContext::builder(Arc::new(ScriptedEngine::new())).build();
        let config = BridgeConfig {
            token: token.map(str::to_string),
            ..BridgeConfig::default()
        };
        SharedState::new(ctx, config, CancellationToken::new())
    }

    #[test]
    fn validate_token_with_secret() {
        let state = state(Some("secret"));
        assert!(state.validate_token(Some("secret")));
        assert!(!state.validate_token(Some("wrong")));
        assert!(!state.validate_token(None));
    }

    #[test]
    fn validate_token_without_secret() {
        let state = state(None);
        assert!(state.validate_token(None));
        assert!(state.validate_token(Some("anything")));
    }
}
