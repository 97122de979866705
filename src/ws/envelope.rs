//! JSON envelope carried in WebSocket text frames.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::unix_timestamp;

/// `{ type, data, timestamp, id }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Epoch seconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub id: String,
}

impl Envelope {
    /// Stamp a new envelope with the current time and a fresh id.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: unix_timestamp(),
            id: message_id(),
        }
    }

    /// Parse a client frame. Anything that is not an envelope becomes a
    /// `message` envelope wrapping the raw text.
    pub fn from_client_text(text: &str) -> Self {
        match serde_json::from_str::<Envelope>(text) {
            Ok(mut envelope) => {
                if envelope.timestamp == 0 {
                    envelope.timestamp = unix_timestamp();
                }
                if envelope.id.is_empty() {
                    envelope.id = message_id();
                }
                envelope
            }
            Err(_) => Envelope::new("message", Value::String(text.to_string())),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": self.kind,
            "data": self.data,
            "timestamp": self.timestamp,
            "id": self.id,
        })
        .to_string()
    }

    pub fn to_message(&self) -> Message {
        Message::Text(self.to_json().into())
    }
}

/// `msg_<uuid>` message identifier.
pub fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_kind_as_type() {
        let envelope = Envelope::new("welcome", json!({"client_id": "conn-1"}));
        let value: Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["data"]["client_id"], "conn-1");
        assert!(value["id"].as_str().unwrap().starts_with("msg_"));
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn client_envelope_is_completed() {
        let envelope = Envelope::from_client_text(r#"{"type":"chat","data":"hi"}"#);
        assert_eq!(envelope.kind, "chat");
        assert_eq!(envelope.data, json!("hi"));
        assert!(!envelope.id.is_empty());
        assert!(envelope.timestamp > 0);
    }

    #[test]
    fn plain_text_is_wrapped() {
        let envelope = Envelope::from_client_text("hello");
        assert_eq!(envelope.kind, "message");
        assert_eq!(envelope.data, json!("hello"));
    }
}
