//! Log events streamed to session observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of progress a log event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thinking,
    Acting,
    Observing,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Thinking => "thinking",
            EventKind::Acting => "acting",
            EventKind::Observing => "observing",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        }
    }
}

/// One observable unit of progress, serialized as a flat record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Position in the session's event log, assigned at publish
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub persona_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub data: Option<Value>,
}

impl LogEvent {
    pub fn new(
        session_id: impl Into<String>,
        persona_name: Option<String>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            persona_name,
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_serialization() {
        let event = LogEvent::new("s-1", Some("Casual Casey".into()), EventKind::Acting, "searching")
            .with_data(serde_json::json!({"tool": "search_products"}));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "acting");
        assert_eq!(json["session_id"], "s-1");
        assert_eq!(json["persona_name"], "Casual Casey");
        assert_eq!(json["message"], "searching");
        assert_eq!(json["data"]["tool"], "search_products");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_session_level_event_has_null_persona() {
        let event = LogEvent::new("s-1", None, EventKind::Complete, "done");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["persona_name"].is_null());
        assert!(json["data"].is_null());
    }
}
