//! Scripted in-memory engine for tests.
//!
//! Each created session records the prompts it receives and either replays a
//! fixed event script after every send or waits for the test to push events
//! by hand through [`ScriptedSession::emit`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Engine, EngineConnection, EngineError, EngineEvent, EngineSession, SessionOptions};

pub struct ScriptedSession {
    id: String,
    model: String,
    resumed: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    reply: Vec<EngineEvent>,
    prompts: Mutex<Vec<String>>,
    disposed: AtomicBool,
    reject_sends: AtomicBool,
}

impl ScriptedSession {
    /// Push an event to the owning session. Returns false once nobody listens.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Make subsequent sends fail synchronously.
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, prompt: &str, _cancel: CancellationToken) -> Result<(), EngineError> {
        if self.is_disposed() {
            return Err(EngineError::Closed);
        }
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(EngineError::SendFailed("rejected by script".to_string()));
        }
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        for event in &self.reply {
            let _ = self.events.send(event.clone());
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedEngine {
    ready: AtomicBool,
    reply: Vec<EngineEvent>,
    create_delay: Option<Duration>,
    next_id: AtomicUsize,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    shut_down: AtomicBool,
}

impl ScriptedEngine {
    /// A ready engine whose sessions never answer on their own.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            reply: Vec::new(),
            create_delay: None,
            next_id: AtomicUsize::new(1),
            sessions: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// A ready engine whose sessions replay `reply` after every prompt.
    pub fn with_reply(reply: Vec<EngineEvent>) -> Self {
        Self {
            reply,
            ..Self::new()
        }
    }

    /// Delay session establishment, widening race windows in tests.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session(&self, id: &str) -> Option<Arc<ScriptedSession>> {
        self.sessions().into_iter().find(|s| s.id == id)
    }

    pub fn created_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn establish(
        &self,
        id: String,
        options: SessionOptions,
        resumed: bool,
    ) -> Result<EngineConnection, EngineError> {
        if !self.is_ready() {
            return Err(EngineError::NotStarted);
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(ScriptedSession {
            id,
            model: options.model,
            resumed,
            events: tx,
            reply: self.reply.clone(),
            prompts: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            reject_sends: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&session));

        Ok(EngineConnection {
            handle: session,
            events: rx,
        })
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<EngineConnection, EngineError> {
        let id = format!("scripted-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.establish(id, options, false).await
    }

    async fn resume_session(
        &self,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<EngineConnection, EngineError> {
        self.establish(session_id.to_string(), options, true).await
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.shut_down.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// The event script of a turn that streams `text` in one delta and goes idle.
pub fn streamed_reply(text: &str) -> Vec<EngineEvent> {
    vec![
        EngineEvent::TurnStart,
        EngineEvent::ContentDelta {
            text: text.to_string(),
        },
        EngineEvent::Message {
            content: text.to_string(),
        },
        EngineEvent::TurnEnd,
        EngineEvent::Idle,
    ]
}
