//! Wire envelope shared by every client transport.
//!
//! Every message is one JSON object `{"type": "...", "payload": {...}}`.
//! Tags are snake_case, payload fields camelCase. Messages that carry no
//! data omit `payload`. A message whose `type` is unknown decodes to
//! `Ok(None)` so newer clients can talk to older servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::Usage;
use crate::persistence::PersistedSession;
use crate::session::{ChatMessage, Session, SessionEvent, SessionRegistry, SessionSummary};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message has no type")]
    MissingType,

    #[error("Invalid payload for {kind}: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Payloads
// ============================================================================

/// Payload naming a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_name: String,
}

/// Payload carrying a prompt for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionText {
    pub session_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    pub session_name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSessionPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsListPayload {
    pub sessions: Vec<SessionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionsPayload {
    pub sessions: Vec<PersistedSession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryPayload {
    pub session_name: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default)]
    pub queued_messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePayload {
    pub session_name: String,
    pub message: ChatMessage,
}

/// Payload carrying a chunk or a complete body of text for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContent {
    pub session_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartedPayload {
    pub session_name: String,
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompletedPayload {
    pub session_name: String,
    pub tool_call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPayload {
    pub session_name: String,
    pub reasoning_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentChangedPayload {
    pub session_name: String,
    pub intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfoPayload {
    pub session_name: String,
    #[serde(flatten)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorPayload {
    pub session_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueChangedPayload {
    pub session_name: String,
    pub pending: usize,
}

/// Failure reply to one client's command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    // Server -> client
    SessionsList(SessionsListPayload),
    PersistedSessions(PersistedSessionsPayload),
    SessionHistory(SessionHistoryPayload),
    UserMessage(UserMessagePayload),
    ContentDelta(SessionContent),
    ToolStarted(ToolStartedPayload),
    ToolCompleted(ToolCompletedPayload),
    ReasoningDelta(ReasoningPayload),
    ReasoningComplete(ReasoningPayload),
    IntentChanged(IntentChangedPayload),
    UsageInfo(UsageInfoPayload),
    TurnStart(SessionRef),
    TurnEnd(SessionRef),
    SessionComplete(SessionContent),
    SessionError(SessionErrorPayload),
    QueueChanged(QueueChangedPayload),
    Error(ErrorPayload),

    // Client -> server
    GetSessions,
    GetHistory(SessionRef),
    SendMessage(SessionText),
    CreateSession(CreateSessionPayload),
    SwitchSession(SessionRef),
    QueueMessage(SessionText),
    GetPersistedSessions,
    ResumeSession(ResumeSessionPayload),
    CloseSession(SessionRef),
    ClearHistory(SessionRef),
}

/// Every tag [`decode`] accepts.
pub const TYPES: &[&str] = &[
    "sessions_list",
    "persisted_sessions",
    "session_history",
    "user_message",
    "content_delta",
    "tool_started",
    "tool_completed",
    "reasoning_delta",
    "reasoning_complete",
    "intent_changed",
    "usage_info",
    "turn_start",
    "turn_end",
    "session_complete",
    "session_error",
    "queue_changed",
    "error",
    "get_sessions",
    "get_history",
    "send_message",
    "create_session",
    "switch_session",
    "queue_message",
    "get_persisted_sessions",
    "resume_session",
    "close_session",
    "clear_history",
];

/// Tags whose messages carry no payload.
const UNIT_TYPES: &[&str] = &["get_sessions", "get_persisted_sessions"];

impl Envelope {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::SessionsList(_) => "sessions_list",
            Envelope::PersistedSessions(_) => "persisted_sessions",
            Envelope::SessionHistory(_) => "session_history",
            Envelope::UserMessage(_) => "user_message",
            Envelope::ContentDelta(_) => "content_delta",
            Envelope::ToolStarted(_) => "tool_started",
            Envelope::ToolCompleted(_) => "tool_completed",
            Envelope::ReasoningDelta(_) => "reasoning_delta",
            Envelope::ReasoningComplete(_) => "reasoning_complete",
            Envelope::IntentChanged(_) => "intent_changed",
            Envelope::UsageInfo(_) => "usage_info",
            Envelope::TurnStart(_) => "turn_start",
            Envelope::TurnEnd(_) => "turn_end",
            Envelope::SessionComplete(_) => "session_complete",
            Envelope::SessionError(_) => "session_error",
            Envelope::QueueChanged(_) => "queue_changed",
            Envelope::Error(_) => "error",
            Envelope::GetSessions => "get_sessions",
            Envelope::GetHistory(_) => "get_history",
            Envelope::SendMessage(_) => "send_message",
            Envelope::CreateSession(_) => "create_session",
            Envelope::SwitchSession(_) => "switch_session",
            Envelope::QueueMessage(_) => "queue_message",
            Envelope::GetPersistedSessions => "get_persisted_sessions",
            Envelope::ResumeSession(_) => "resume_session",
            Envelope::CloseSession(_) => "close_session",
            Envelope::ClearHistory(_) => "clear_history",
        }
    }

    pub fn error(message: impl Into<String>, session_name: Option<String>) -> Self {
        Envelope::Error(ErrorPayload {
            message: message.into(),
            session_name,
        })
    }

    /// Current sessions snapshot.
    pub fn sessions_list(registry: &SessionRegistry) -> Self {
        Envelope::SessionsList(SessionsListPayload {
            sessions: registry.list_summaries(),
            active_session: registry.active_session_name(),
        })
    }

    pub fn persisted_sessions(sessions: Vec<PersistedSession>) -> Self {
        Envelope::PersistedSessions(PersistedSessionsPayload { sessions })
    }

    pub fn history(session: &Session) -> Self {
        Envelope::SessionHistory(SessionHistoryPayload {
            session_name: session.name().to_string(),
            messages: session.history(),
            is_processing: session.is_processing(),
            queued_messages: session.queued_messages(),
        })
    }

    /// Wrap one session event, tagging it with the session's name.
    pub fn from_session_event(session_name: &str, event: SessionEvent) -> Self {
        let session_name = session_name.to_string();
        match event {
            SessionEvent::UserMessage { message } => Envelope::UserMessage(UserMessagePayload {
                session_name,
                message,
            }),
            SessionEvent::TurnStart => Envelope::TurnStart(SessionRef { session_name }),
            SessionEvent::Delta { content } => Envelope::ContentDelta(SessionContent {
                session_name,
                content,
            }),
            SessionEvent::ToolStarted {
                tool_call_id,
                tool_name,
            } => Envelope::ToolStarted(ToolStartedPayload {
                session_name,
                tool_call_id,
                tool_name,
            }),
            SessionEvent::ToolCompleted {
                tool_call_id,
                success,
                result,
            } => Envelope::ToolCompleted(ToolCompletedPayload {
                session_name,
                tool_call_id,
                success,
                result,
            }),
            SessionEvent::ReasoningDelta {
                reasoning_id,
                content,
            } => Envelope::ReasoningDelta(ReasoningPayload {
                session_name,
                reasoning_id,
                content,
            }),
            SessionEvent::ReasoningComplete {
                reasoning_id,
                content,
            } => Envelope::ReasoningComplete(ReasoningPayload {
                session_name,
                reasoning_id,
                content,
            }),
            SessionEvent::IntentChanged { intent } => {
                Envelope::IntentChanged(IntentChangedPayload {
                    session_name,
                    intent,
                })
            }
            SessionEvent::UsageInfo(usage) => Envelope::UsageInfo(UsageInfoPayload {
                session_name,
                usage,
            }),
            SessionEvent::TurnEnd => Envelope::TurnEnd(SessionRef { session_name }),
            SessionEvent::Complete { content } => Envelope::SessionComplete(SessionContent {
                session_name,
                content,
            }),
            SessionEvent::Error { message } => Envelope::SessionError(SessionErrorPayload {
                session_name,
                message,
            }),
            SessionEvent::QueueChanged { pending } => {
                Envelope::QueueChanged(QueueChangedPayload {
                    session_name,
                    pending,
                })
            }
        }
    }
}

pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode one message.
///
/// Returns `Ok(None)` for well-formed messages of an unknown type and `Err`
/// for malformed JSON or an invalid payload of a known type.
pub fn decode(text: &str) -> Result<Option<Envelope>, ProtocolError> {
    let mut value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !TYPES.contains(&kind.as_str()) {
        log::debug!("Ignoring message of unknown type {}", kind);
        return Ok(None);
    }

    if UNIT_TYPES.contains(&kind.as_str()) {
        if let Some(object) = value.as_object_mut() {
            object.remove("payload");
        }
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| ProtocolError::Payload { kind, source })
}
