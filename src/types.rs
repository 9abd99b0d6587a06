use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single entry in the conversation.
///
/// The wire shape is fixed by the backend: `is_bot` and an RFC 3339
/// `timestamp`. The persisted snapshot reuses the same representation so
/// existing data stays readable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub content: String,
    #[serde(rename = "is_bot")]
    pub from_assistant: bool,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn user(id: i64, content: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            content: content.into(),
            from_assistant: false,
            created_at,
        }
    }

    pub fn assistant(id: i64, content: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            content: content.into(),
            from_assistant: true,
            created_at,
        }
    }
}

/// Coarse classification of a user-facing failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Connection,
    Server,
    /// Reserved for input validation; no current flow produces it.
    Input,
    General,
}

/// The single error surfaced to presentation at any given time.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorNotice {
    pub text: String,
    pub category: ErrorCategory,
}

impl ErrorNotice {
    pub fn new(text: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            text: text.into(),
            category,
        }
    }
}

/// Snapshot published by the conversation manager on every mutation.
///
/// Presentation subscribes to these; it never mutates conversation state
/// directly.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<ErrorNotice>,
    pub network_online: bool,
    pub backend_available: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            loading: false,
            error: None,
            network_online: true,
            backend_available: true,
        }
    }
}

/// Result of the most recent backend health probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No probe has completed yet.
    Unknown,
    Healthy,
    /// The backend answered but reported itself unhealthy.
    Unhealthy,
    /// The probe request itself failed.
    Unreachable,
}

/// Connectivity snapshot published by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub network_online: bool,
    pub backend_available: bool,
    pub last_probe: ProbeOutcome,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            network_online: true,
            backend_available: true,
            last_probe: ProbeOutcome::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn message_uses_backend_field_names() {
        let message = Message::assistant(7, "hello", datetime!(2024-03-01 12:30:00 UTC));
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["id"], 7);
        assert_eq!(json["is_bot"], true);
        assert_eq!(json["timestamp"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn message_parses_backend_history_entry() {
        let raw = r#"{"id":3,"content":"What is a migraine?","is_bot":false,"timestamp":"2024-03-01T09:15:22Z"}"#;
        let message: Message = serde_json::from_str(raw).expect("parse");

        assert_eq!(message.id, 3);
        assert!(!message.from_assistant);
        assert_eq!(message.content, "What is a migraine?");
    }
}
