//! Turn-lifecycle events emitted by an engine session.

use serde::{Deserialize, Serialize};

/// Token accounting reported by the engine during a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
}

/// Event type emitted by every engine backend.
///
/// Events for one session are delivered in order and never interleave two
/// turns. The wire form (used by the process engine) is one JSON object per
/// line, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineEvent {
    // === Turn lifecycle ===
    /// The engine began producing a response.
    TurnStart,

    /// The engine finished one assistant turn (more may follow before idle).
    TurnEnd,

    /// The session has no more work for the current prompt.
    Idle,

    /// The current prompt failed.
    Error { message: String },

    // === Content ===
    /// Incremental response fragment.
    ContentDelta { text: String },

    /// A complete assistant message. May repeat content already streamed.
    Message { content: String },

    // === Tools ===
    ToolStart {
        tool_call_id: String,
        tool_name: String,
    },

    ToolComplete {
        tool_call_id: String,
        #[serde(default)]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    // === Reasoning ===
    ReasoningDelta { reasoning_id: String, text: String },

    ReasoningComplete {
        reasoning_id: String,
        content: String,
    },

    // === Status ===
    IntentChanged { intent: String },

    UsageInfo(Usage),
}
