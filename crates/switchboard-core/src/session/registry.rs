//! SessionRegistry: the set of live sessions shared by every interface.
//!
//! Names are unique among live sessions. Inserts go through the DashMap entry
//! API so two concurrent creates with the same name cannot both succeed; the
//! loser disposes the engine session it allocated.
//!
//! Lock order is the active pointer first, then the map. Nothing takes the
//! active lock while holding a map guard.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::SessionError;
use super::state::{Session, SessionParams, SessionSummary};
use crate::engine::{Engine, EngineConnection, SessionOptions};
use crate::event_bus::{EventBus, EventStream, RegistryEvent};
use crate::persistence::{PersistedSession, SessionStore};

pub struct SessionRegistry {
    engine: Arc<dyn Engine>,
    store: Arc<dyn SessionStore>,
    sessions: DashMap<String, Arc<Session>>,
    active: Mutex<Option<String>>,
    events: EventBus,
    default_model: String,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn Engine>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            engine,
            store,
            sessions: DashMap::new(),
            active: Mutex::new(None),
            events: EventBus::new(),
            default_model: String::new(),
        }
    }

    /// Model used when a create request leaves it blank.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out the outgoing event stream. Only the first call returns `Some`.
    pub fn take_event_stream(&self) -> Option<EventStream> {
        self.events.take_stream()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn create_session(
        &self,
        name: &str,
        model: &str,
        working_directory: Option<String>,
    ) -> Result<Arc<Session>, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if self.sessions.contains_key(name) {
            return Err(SessionError::DuplicateName(name.to_string()));
        }
        if !self.engine.is_ready() {
            return Err(SessionError::NotInitialized);
        }

        let model = if model.trim().is_empty() {
            self.default_model.clone()
        } else {
            model.trim().to_string()
        };
        let working_directory = working_directory.filter(|dir| !dir.trim().is_empty());

        let connection = self
            .engine
            .create_session(SessionOptions {
                model: model.clone(),
                working_directory: working_directory.clone(),
            })
            .await?;

        let params = SessionParams {
            name: name.to_string(),
            model,
            working_directory,
            resumed: false,
        };
        let session = self.insert(params, connection).await?;
        log::info!("Created session {}", name);
        Ok(session)
    }

    /// Reopen a persisted engine session under `display_name`.
    ///
    /// A blank display name falls back to the session id. Name and id
    /// collisions are rejected before the engine is contacted.
    pub async fn resume_session(
        &self,
        session_id: &str,
        display_name: Option<&str>,
    ) -> Result<Arc<Session>, SessionError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(SessionError::EmptyId);
        }
        let name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(session_id);

        if self.sessions.contains_key(name) {
            return Err(SessionError::DuplicateName(name.to_string()));
        }
        if let Some(open) = self.find_by_session_id(session_id) {
            return Err(SessionError::AlreadyOpen {
                session_id: session_id.to_string(),
                name: open.name().to_string(),
            });
        }
        if !self.engine.is_ready() {
            return Err(SessionError::NotInitialized);
        }

        let store = Arc::clone(&self.store);
        let id = session_id.to_string();
        let working_directory = match tokio::task::spawn_blocking(move || store.find(&id)).await {
            Ok(Ok(record)) => record.and_then(|r| r.working_directory),
            Ok(Err(e)) => {
                log::warn!("Failed to read persisted session {}: {}", session_id, e);
                None
            }
            Err(e) => {
                log::warn!("Persisted session lookup for {} failed: {}", session_id, e);
                None
            }
        };

        let connection = self
            .engine
            .resume_session(
                session_id,
                SessionOptions {
                    model: self.default_model.clone(),
                    working_directory: working_directory.clone(),
                },
            )
            .await?;

        let params = SessionParams {
            name: name.to_string(),
            model: self.default_model.clone(),
            working_directory,
            resumed: true,
        };
        let session = self.insert(params, connection).await?;
        log::info!("Resumed session {} as {}", session_id, name);
        Ok(session)
    }

    /// Compare-and-insert. On a lost race the fresh session is closed, which
    /// disposes its engine handle.
    async fn insert(
        &self,
        params: SessionParams,
        connection: EngineConnection,
    ) -> Result<Arc<Session>, SessionError> {
        let name = params.name.clone();
        let session = Session::start(params, connection, self.events.sink(&name));

        let inserted = {
            let mut active = self.lock_active();
            let inserted = match self.sessions.entry(name.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&session));
                    true
                }
            };
            if inserted && active.is_none() {
                *active = Some(name.clone());
            }
            inserted
        };

        if !inserted {
            log::debug!("Lost insert race for session {}", name);
            if let Err(e) = session.close().await {
                log::warn!("Failed to dispose duplicate session {}: {}", name, e);
            }
            return Err(SessionError::DuplicateName(name));
        }

        self.events.emit(RegistryEvent::SessionsChanged);
        Ok(session)
    }

    /// Point the active session at `name`. Returns false for unknown names.
    pub fn switch_session(&self, name: &str) -> bool {
        {
            let mut active = self.lock_active();
            if !self.sessions.contains_key(name) {
                return false;
            }
            *active = Some(name.to_string());
        }
        self.events.emit(RegistryEvent::SessionsChanged);
        true
    }

    /// Remove and close a session.
    ///
    /// A pending turn fails with `Closed` before the engine handle is
    /// disposed. If the session was active, another live session (if any)
    /// becomes active.
    pub async fn close_session(&self, name: &str) -> Result<(), SessionError> {
        let session = {
            let mut active = self.lock_active();
            let (_, session) = self
                .sessions
                .remove(name)
                .ok_or_else(|| SessionError::NotFound(name.to_string()))?;
            if active.as_deref() == Some(name) {
                *active = self.sessions.iter().next().map(|entry| entry.key().clone());
            }
            session
        };

        if let Err(e) = session.close().await {
            log::warn!("Failed to dispose session {}: {}", name, e);
        }
        log::info!("Closed session {}", name);
        self.events.emit(RegistryEvent::SessionsChanged);
        Ok(())
    }

    /// Close every session, then shut the engine down.
    pub async fn shutdown(&self) {
        {
            let mut active = self.lock_active();
            *active = None;
        }
        let names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, session)) = self.sessions.remove(&name) {
                if let Err(e) = session.close().await {
                    log::warn!("Failed to dispose session {}: {}", name, e);
                }
            }
        }
        if let Err(e) = self.engine.shutdown().await {
            log::warn!("Engine shutdown failed: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_session(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`get_session`](Self::get_session) but as a `Result`.
    pub fn require_session(&self, name: &str) -> Result<Arc<Session>, SessionError> {
        self.get_session(name)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))
    }

    /// All live sessions, oldest first.
    pub fn get_all_sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.name().cmp(b.name()))
        });
        sessions
    }

    pub fn active_session_name(&self) -> Option<String> {
        self.lock_active().clone()
    }

    pub fn get_active_session(&self) -> Option<Arc<Session>> {
        let active = self.lock_active();
        active.as_deref().and_then(|name| self.get_session(name))
    }

    pub fn list_summaries(&self) -> Vec<SessionSummary> {
        let active = self.active_session_name();
        self.get_all_sessions()
            .iter()
            .map(|session| session.summary(active.as_deref() == Some(session.name())))
            .collect()
    }

    /// Persisted records not held by a live session, newest first.
    ///
    /// Reads the store on the calling thread.
    pub fn get_persisted_sessions(&self) -> Result<Vec<PersistedSession>, SessionError> {
        let mut records = self
            .store
            .list()
            .map_err(|e| SessionError::Store(e.to_string()))?;
        records.retain(|record| self.find_by_session_id(&record.id).is_none());
        records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(records)
    }

    fn find_by_session_id(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().session_id().as_deref() == Some(session_id))
            .map(|entry| Arc::clone(entry.value()))
    }
}
