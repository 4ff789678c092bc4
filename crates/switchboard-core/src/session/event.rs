//! Events a session publishes to the registry's outgoing stream.

use super::message::ChatMessage;
use crate::engine::Usage;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A prompt was accepted and recorded in history.
    UserMessage { message: ChatMessage },

    TurnStart,

    /// Response fragment, in arrival order.
    Delta { content: String },

    ToolStarted {
        tool_call_id: String,
        tool_name: String,
    },

    ToolCompleted {
        tool_call_id: String,
        success: bool,
        result: Option<String>,
    },

    ReasoningDelta {
        reasoning_id: String,
        content: String,
    },

    ReasoningComplete {
        reasoning_id: String,
        content: String,
    },

    IntentChanged { intent: String },

    UsageInfo(Usage),

    TurnEnd,

    /// The session went idle; `content` is the assembled response.
    Complete { content: String },

    /// The turn failed and the session is idle again.
    Error { message: String },

    /// The pending prompt queue changed length.
    QueueChanged { pending: usize },
}
