//! Shared types used across the parley engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON field map passed between detection, slot-filling, and execution.
pub type FieldMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Conversation primitives
// ---------------------------------------------------------------------------

/// Speaker role attached to history entries and stored messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the recent-history window handed to the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Persistent chat record metadata (owned by the chat store, read-only here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub contact_name: String,
    pub contact_phone: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Direction of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Outcome of one detection round against the tool-calling model.
#[derive(Debug, Clone)]
pub enum Detection {
    /// The model selected a tool and returned arguments.
    Matched {
        tool_name: String,
        fields: FieldMap,
    },
    /// The model declined to call a tool and answered in plain text.
    Fallback { message: String },
    /// No tool call and no text: nothing to act on.
    NoMatch,
}

// ---------------------------------------------------------------------------
// Slot-filling
// ---------------------------------------------------------------------------

/// A required field the user has not supplied yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingField {
    pub name: String,
    pub json_name: String,
    pub description: String,
}

/// Slot-filling in progress: returned to the caller so the chat layer can
/// surface it and feed the clarification exchange back as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingIntention {
    pub tool_name: String,
    pub collected: FieldMap,
    pub missing: Vec<MissingField>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Result of a successfully executed intention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ExecutionOutcome {
    pub fn new(data: Value, status_code: Option<u16>) -> Self {
        Self {
            success: true,
            data,
            status_code,
        }
    }
}

/// A recorded intention execution (persisted by the chat store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub chat_id: String,
    pub tool_name: String,
    pub fields: Value,
    pub succeeded: bool,
    pub reply: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine I/O
// ---------------------------------------------------------------------------

/// One inbound turn handed to the engine by the chat layer.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub chat: ChatRecord,
    pub history: Vec<HistoryEntry>,
    pub message: String,
}

/// An intention the engine actually ran this turn (for interaction records).
#[derive(Debug, Clone)]
pub struct ExecutedIntention {
    pub tool_name: String,
    pub fields: FieldMap,
    pub succeeded: bool,
}

/// The engine's reply for one turn.
#[derive(Debug, Clone)]
pub struct EngineReply {
    /// Full reply text.
    pub text: String,
    /// Reply split into delimiter-separated segments (single entry when the
    /// tenant's split flag is off).
    pub segments: Vec<String>,
    /// Set when a matched intention is still collecting required fields.
    pub pending: Option<PendingIntention>,
    /// Set when an intention was executed (successfully or not).
    pub executed: Option<ExecutedIntention>,
    /// Synthesized audio, when the tenant's audio flag is on.
    pub audio: Option<Vec<u8>>,
}
