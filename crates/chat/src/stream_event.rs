//! Streaming events relayed to the caller.
//!
//! `StreamEvent` wraps provider-level fragments into the events the
//! gateway forwards to clients over SSE:
//! - `delta` — partial reply text from the completion model
//! - `done`  — the stream is complete; carries the persisted reply turn
//! - `error` — an error occurred mid-stream; the sequence ends here

use parlor_core::provider::Usage;
use parlor_core::turn::Turn;
use serde::{Deserialize, Serialize};

/// Events emitted while a streamed reply is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial reply text.
    Delta { content: String },

    /// The stream is complete — the reply turn is persisted.
    Done {
        conversation_id: i64,
        reply: Turn,
        usage: Option<Usage>,
    },

    /// An error occurred mid-stream. Not retried; a retry is a new request.
    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_serialization() {
        let event = StreamEvent::Delta { content: "He".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"delta""#));
        assert!(json.contains(r#""content":"He""#));
    }

    #[test]
    fn error_serialization() {
        let event = StreamEvent::Error { message: "boom".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"error""#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(StreamEvent::Delta { content: "x".into() }.event_type(), "delta");
        assert_eq!(StreamEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"delta","content":"hi"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Delta { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
