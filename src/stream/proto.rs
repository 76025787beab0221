use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded protocol unit from a streamed turn response.
///
/// The wire shape is `{"event_type": ..., "data": ...}`. Unrecognized
/// `event_type` values fail to decode and are skipped upstream; a single
/// unknown or corrupt frame never aborts the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Incremental text delta for the assistant reply.
    Token(TokenPayload),
    /// Trace of an action the backend took while producing the reply.
    ActionTrace(Value),
    /// Artifact produced mid-turn (document, graph fragment, ...).
    Artifact(Value),
    /// The backend is waiting on an explicit user approval.
    ApprovalNeeded(Value),
    /// Out-of-band progress update for background work.
    BackgroundUpdate(Value),
    /// Terminal frame: the turn finished cleanly.
    Complete(CompletePayload),
    /// Terminal frame: the server aborted the turn.
    Error(ErrorPayload),
}

impl StreamFrame {
    /// Whether this frame concludes the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of a [`StreamFrame::Token`] frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPayload {
    pub text: String,
}

/// Payload of a [`StreamFrame::Complete`] frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletePayload {
    pub message_id: String,
    pub session_id: String,
    pub duration_ms: u64,
}

/// Payload of a [`StreamFrame::Error`] frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
}

/// JSON body of a turn request (`POST /sessions/{id}/messages`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRequest {
    pub content: String,
    pub mentioned_entity_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_payload: Option<Value>,
}
