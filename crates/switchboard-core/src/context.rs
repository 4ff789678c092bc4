//! AppContext - the shared state handed to every interface.
//!
//! The daemon builds one context at startup and passes clones of it to the
//! bridge server and anything else that drives sessions. There is no global
//! state; everything reachable from a request goes through here.
//!
//! ```text
//!              ┌────────────────────┐
//!              │     AppContext     │
//!              ├────────────────────┤
//!              │  - SessionRegistry │──── Engine
//!              │  - SessionStore    │
//!              └─────────┬──────────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   ┌─────────────┐             ┌───────────────┐
//!   │   Bridge    │             │ Other drivers │
//!   │ (WebSocket) │             │   (future)    │
//!   └─────────────┘             └───────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::Engine;
use crate::paths;
use crate::persistence::{DirectorySessionStore, SessionStore};
use crate::session::SessionRegistry;

/// Builder for [`AppContext`]. The engine is the only required piece.
pub struct AppContextBuilder {
    engine: Arc<dyn Engine>,
    store: Option<Arc<dyn SessionStore>>,
    default_model: String,
}

impl AppContextBuilder {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            store: None,
            default_model: String::new(),
        }
    }

    /// Use a specific persisted-session store.
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read persisted sessions from `dir`.
    pub fn sessions_dir(self, dir: PathBuf) -> Self {
        self.store(Arc::new(DirectorySessionStore::new(dir)))
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Build the context. Without an explicit store, sessions are read from
    /// `~/.switchboard/sessions`.
    pub fn build(self) -> AppContext {
        let store = self.store.unwrap_or_else(|| {
            let dir = paths::sessions_dir().unwrap_or_else(|| PathBuf::from("sessions"));
            Arc::new(DirectorySessionStore::new(dir))
        });
        let registry = SessionRegistry::new(self.engine, Arc::clone(&store))
            .with_default_model(self.default_model);

        AppContext {
            registry: Arc::new(registry),
            store,
        }
    }
}

/// Cloning shares the same registry.
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn SessionStore>,
}

impl AppContext {
    pub fn builder(engine: Arc<dyn Engine>) -> AppContextBuilder {
        AppContextBuilder::new(engine)
    }
}
