//! Per-session state and the turn state machine.
//!
//! A session is Idle or Processing. `send_prompt` moves it to Processing and
//! waits; the engine's `idle` or `error` event moves it back. Engine events
//! arrive on a dedicated pump task and are applied under the session mutex,
//! so a turn's events never race each other even when prompts come from
//! several connections at once.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::SessionError;
use super::event::SessionEvent;
use super::message::ChatMessage;
use crate::engine::{EngineConnection, EngineEvent, EngineSession};
use crate::event_bus::EventSink;

type TurnResult = Result<String, SessionError>;

/// Immutable attributes of a session, fixed at creation.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub name: String,
    pub model: String,
    pub working_directory: Option<String>,
    pub resumed: bool,
}

/// Serializable snapshot of a session for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub is_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub message_count: usize,
    pub queue_length: usize,
    pub is_active: bool,
    #[serde(default)]
    pub resumed: bool,
}

/// Content assembled during the current turn.
#[derive(Default)]
struct TurnBuffer {
    content: String,
    received_deltas: bool,
}

struct SessionState {
    history: Vec<ChatMessage>,
    is_processing: bool,
    queue: VecDeque<String>,
    last_updated_at: DateTime<Utc>,
    buffer: TurnBuffer,
    /// Incremented per turn so a stale caller never touches a newer turn.
    generation: u64,
    pending: Option<oneshot::Sender<TurnResult>>,
    closed: bool,
}

/// A turn that was admitted under the lock and still has to be sent.
struct StartedTurn {
    generation: u64,
    message: ChatMessage,
    result: oneshot::Receiver<TurnResult>,
}

/// One agent conversation bound to a live engine session.
pub struct Session {
    params: SessionParams,
    created_at: DateTime<Utc>,
    engine: Arc<dyn EngineSession>,
    events: EventSink,
    state: Mutex<SessionState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Wrap an engine connection and start pumping its events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        params: SessionParams,
        connection: EngineConnection,
        events: EventSink,
    ) -> Arc<Self> {
        let now = Utc::now();
        let session = Arc::new(Self {
            params,
            created_at: now,
            engine: connection.handle,
            events,
            state: Mutex::new(SessionState {
                history: Vec::new(),
                is_processing: false,
                queue: VecDeque::new(),
                last_updated_at: now,
                buffer: TurnBuffer::default(),
                generation: 0,
                pending: None,
                closed: false,
            }),
            pump: Mutex::new(None),
        });

        let weak = Arc::downgrade(&session);
        let mut engine_events = connection.events;
        let pump = tokio::spawn(async move {
            while let Some(event) = engine_events.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.handle_engine_event(event);
            }
        });
        *session.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);

        session
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn model(&self) -> &str {
        &self.params.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.params.working_directory.as_deref()
    }

    pub fn is_resumed(&self) -> bool {
        self.params.resumed
    }

    /// Engine correlation id, if the engine tracks one.
    pub fn session_id(&self) -> Option<String> {
        let id = self.engine.session_id();
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn is_processing(&self) -> bool {
        self.lock_state().is_processing
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock_state().history.clone()
    }

    pub fn queued_messages(&self) -> Vec<String> {
        self.lock_state().queue.iter().cloned().collect()
    }

    pub fn summary(&self, is_active: bool) -> SessionSummary {
        let state = self.lock_state();
        SessionSummary {
            name: self.params.name.clone(),
            model: self.params.model.clone(),
            created_at: self.created_at,
            last_updated_at: state.last_updated_at,
            is_processing: state.is_processing,
            session_id: self.session_id(),
            working_directory: self.params.working_directory.clone(),
            message_count: state.history.len(),
            queue_length: state.queue.len(),
            is_active,
            resumed: self.params.resumed,
        }
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Send a prompt and wait for the assembled response.
    ///
    /// Fails with `AlreadyProcessing` without touching any state if a turn is
    /// in flight. Cancelling `cancel` resolves this call with `Cancelled`, but
    /// the engine may keep working; the session stays Processing until the
    /// engine reports idle or error.
    pub async fn send_prompt(&self, prompt: &str, cancel: CancellationToken) -> TurnResult {
        let turn = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(SessionError::Closed(self.params.name.clone()));
            }
            if state.is_processing {
                return Err(SessionError::AlreadyProcessing(self.params.name.clone()));
            }
            Self::start_turn(&mut state, prompt)
        };
        self.run_turn(prompt, turn, cancel).await
    }

    /// Start a turn with the oldest queued message, if the session is idle.
    ///
    /// The pop and the transition to Processing happen under one lock, so
    /// concurrent drivers never lose or duplicate a queued message. Returns
    /// `None` when nothing was sent.
    pub async fn send_next_queued(&self, cancel: CancellationToken) -> Option<TurnResult> {
        let (prompt, turn, pending) = {
            let mut state = self.lock_state();
            if state.closed || state.is_processing {
                return None;
            }
            let prompt = state.queue.pop_front()?;
            let turn = Self::start_turn(&mut state, &prompt);
            (prompt, turn, state.queue.len())
        };
        self.events.emit(SessionEvent::QueueChanged { pending });
        Some(self.run_turn(&prompt, turn, cancel).await)
    }

    fn start_turn(state: &mut SessionState, prompt: &str) -> StartedTurn {
        let message = ChatMessage::user(prompt);
        let (tx, rx) = oneshot::channel();

        state.history.push(message.clone());
        state.is_processing = true;
        state.buffer = TurnBuffer::default();
        state.generation += 1;
        state.pending = Some(tx);
        state.last_updated_at = message.timestamp;

        StartedTurn {
            generation: state.generation,
            message,
            result: rx,
        }
    }

    async fn run_turn(
        &self,
        prompt: &str,
        turn: StartedTurn,
        cancel: CancellationToken,
    ) -> TurnResult {
        let StartedTurn {
            generation,
            message,
            result,
        } = turn;
        self.events.emit(SessionEvent::UserMessage { message });

        if let Err(e) = self.engine.send(prompt, cancel.clone()).await {
            log::warn!("Engine rejected prompt for session {}: {}", self.params.name, e);
            let aborted = {
                let mut state = self.lock_state();
                if state.generation == generation && state.is_processing {
                    state.is_processing = false;
                    state.buffer = TurnBuffer::default();
                    state.pending.take();
                    true
                } else {
                    false
                }
            };
            if aborted {
                self.events.emit(SessionEvent::Error {
                    message: e.to_string(),
                });
            }
            return Err(e.into());
        }

        tokio::select! {
            biased;
            outcome = result => {
                outcome.unwrap_or_else(|_| Err(SessionError::Closed(self.params.name.clone())))
            }
            _ = cancel.cancelled() => {
                let mut state = self.lock_state();
                if state.generation == generation {
                    state.pending.take();
                }
                log::debug!("Prompt cancelled for session {}", self.params.name);
                Err(SessionError::Cancelled)
            }
        }
    }

    /// Apply one engine event. Runs on the pump task.
    fn handle_engine_event(&self, event: EngineEvent) {
        let outgoing = {
            let mut state = self.lock_state();
            match event {
                EngineEvent::TurnStart => {
                    state.buffer.received_deltas = false;
                    Some(SessionEvent::TurnStart)
                }
                EngineEvent::ContentDelta { text } => {
                    state.buffer.content.push_str(&text);
                    state.buffer.received_deltas = true;
                    Some(SessionEvent::Delta { content: text })
                }
                EngineEvent::Message { content } => {
                    // Streamed turns already hold this content.
                    if state.buffer.received_deltas || content.is_empty() {
                        None
                    } else {
                        state.buffer.content.push_str(&content);
                        Some(SessionEvent::Delta { content })
                    }
                }
                EngineEvent::TurnEnd => Some(SessionEvent::TurnEnd),
                EngineEvent::ToolStart {
                    tool_call_id,
                    tool_name,
                } => Some(SessionEvent::ToolStarted {
                    tool_call_id,
                    tool_name,
                }),
                EngineEvent::ToolComplete {
                    tool_call_id,
                    success,
                    result,
                } => Some(SessionEvent::ToolCompleted {
                    tool_call_id,
                    success,
                    result,
                }),
                EngineEvent::ReasoningDelta { reasoning_id, text } => {
                    Some(SessionEvent::ReasoningDelta {
                        reasoning_id,
                        content: text,
                    })
                }
                EngineEvent::ReasoningComplete {
                    reasoning_id,
                    content,
                } => Some(SessionEvent::ReasoningComplete {
                    reasoning_id,
                    content,
                }),
                EngineEvent::IntentChanged { intent } => {
                    Some(SessionEvent::IntentChanged { intent })
                }
                EngineEvent::UsageInfo(usage) => Some(SessionEvent::UsageInfo(usage)),
                EngineEvent::Idle => {
                    let content = std::mem::take(&mut state.buffer).content;
                    if !content.is_empty() {
                        let message = ChatMessage::assistant(content.clone());
                        state.last_updated_at = message.timestamp;
                        state.history.push(message);
                    }
                    state.is_processing = false;
                    if let Some(pending) = state.pending.take() {
                        let _ = pending.send(Ok(content.clone()));
                    }
                    Some(SessionEvent::Complete { content })
                }
                EngineEvent::Error { message } => {
                    state.buffer = TurnBuffer::default();
                    state.is_processing = false;
                    if let Some(pending) = state.pending.take() {
                        let _ = pending.send(Err(SessionError::TurnFailed(message.clone())));
                    }
                    Some(SessionEvent::Error { message })
                }
            }
        };

        if let Some(event) = outgoing {
            self.events.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // Queue and history
    // ------------------------------------------------------------------

    /// Append a prompt to the FIFO queue. Returns the new queue length.
    ///
    /// The session never drains the queue on its own; a driver calls
    /// [`Session::send_next_queued`] once the session is idle.
    pub fn enqueue_message(&self, text: impl Into<String>) -> usize {
        let pending = {
            let mut state = self.lock_state();
            state.queue.push_back(text.into());
            state.queue.len()
        };
        self.events.emit(SessionEvent::QueueChanged { pending });
        pending
    }

    pub fn clear_history(&self) {
        let mut state = self.lock_state();
        state.history.clear();
        state.last_updated_at = Utc::now();
    }

    /// Fail any pending turn, stop the event pump and dispose the engine
    /// session.
    pub async fn close(&self) -> Result<(), SessionError> {
        let pending = {
            let mut state = self.lock_state();
            state.closed = true;
            state.is_processing = false;
            state.buffer = TurnBuffer::default();
            state.pending.take()
        };
        if let Some(pending) = pending {
            let _ = pending.send(Err(SessionError::Closed(self.params.name.clone())));
        }
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.engine.dispose().await?;
        Ok(())
    }
}
