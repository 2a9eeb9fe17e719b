//! Event message types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Fields every event must carry, and the only fields it may carry
const REQUIRED_FIELDS: [&str; 3] = ["event_type", "agent_id", "data"];

/// Protocol-level errors
///
/// None of these are fatal: the server answers each with a fixed response
/// string and keeps the connection open.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    /// The response string sent back to the simulation for this error
    pub fn response(&self) -> String {
        match self {
            ProtocolError::InvalidJson(_) => crate::RESPONSE_INVALID_JSON.to_string(),
            ProtocolError::MalformedEvent(_) => crate::RESPONSE_INVALID_DATA.to_string(),
            ProtocolError::UnknownEventType(_) => crate::RESPONSE_UNKNOWN_EVENT.to_string(),
            ProtocolError::MessageTooLarge { limit, .. } => {
                format!("Error: message exceeds {} bytes", limit)
            }
        }
    }
}

/// Known event kinds
///
/// `event_type` strings that do not map to a variant are reported as
/// [`ProtocolError::UnknownEventType`] by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An agent changed state and wants a thought back
    StateChange,
    /// An agent wants a line of generated dialogue
    Dialogue,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::StateChange, EventKind::Dialogue];

    /// Parse the wire name of an event kind
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "state_change" => Some(EventKind::StateChange),
            "dialogue" => Some(EventKind::Dialogue),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChange => "state_change",
            EventKind::Dialogue => "dialogue",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event notification from the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_type: String,
    pub agent_id: String,
    pub data: Value,
}

impl EventMessage {
    pub fn new(event_type: impl Into<String>, agent_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            data,
        }
    }

    /// Decode and validate one message payload
    ///
    /// Bytes that are not UTF-8 JSON yield [`ProtocolError::InvalidJson`];
    /// JSON that is not an object with exactly the three event fields yields
    /// [`ProtocolError::MalformedEvent`].
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::MalformedEvent(
                "event must be a JSON object".to_string(),
            ));
        };

        if let Some(extra) = fields
            .keys()
            .find(|key| !REQUIRED_FIELDS.contains(&key.as_str()))
        {
            return Err(ProtocolError::MalformedEvent(format!(
                "unexpected field '{}'",
                extra
            )));
        }

        let event_type = take_string(&mut fields, "event_type")?;
        let agent_id = take_string(&mut fields, "agent_id")?;
        let data = fields
            .remove("data")
            .ok_or_else(|| ProtocolError::MalformedEvent("missing field 'data'".to_string()))?;

        Ok(Self {
            event_type,
            agent_id,
            data,
        })
    }

    /// The known kind of this event, if any
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    /// Serialize to the JSON wire representation (without framing)
    pub fn to_json(&self) -> String {
        // An EventMessage always holds a valid serde_json::Value, so this cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> Result<String, ProtocolError> {
    match fields.remove(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ProtocolError::MalformedEvent(format!(
            "field '{}' must be a string, got {}",
            name,
            json_type_name(&other)
        ))),
        None => Err(ProtocolError::MalformedEvent(format!(
            "missing field '{}'",
            name
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_event() {
        let msg = EventMessage::parse(
            br#"{"event_type": "state_change", "agent_id": "npc-1", "data": {"mood": "calm"}}"#,
        )
        .unwrap();

        assert_eq!(msg.event_type, "state_change");
        assert_eq!(msg.agent_id, "npc-1");
        assert_eq!(msg.data, json!({"mood": "calm"}));
        assert_eq!(msg.kind(), Some(EventKind::StateChange));
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = EventMessage::parse(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert_eq!(err.response(), crate::RESPONSE_INVALID_JSON);
    }

    #[test]
    fn test_parse_invalid_utf8() {
        let err = EventMessage::parse(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_missing_fields() {
        for payload in [
            r#"{"event_type":"state_change","data":{}}"#,
            r#"{"agent_id":"npc-1","data":{}}"#,
            r#"{"event_type":"state_change","agent_id":"npc-1"}"#,
        ] {
            let err = EventMessage::parse(payload.as_bytes()).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedEvent(_)),
                "payload {} gave {:?}",
                payload,
                err
            );
            assert_eq!(err.response(), crate::RESPONSE_INVALID_DATA);
        }
    }

    #[test]
    fn test_null_data_is_present() {
        let msg =
            EventMessage::parse(br#"{"event_type":"x","agent_id":"a","data":null}"#).unwrap();
        assert_eq!(msg.data, Value::Null);
        assert_eq!(msg.kind(), None);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = EventMessage::parse(
            br#"{"event_type":"state_change","agent_id":"a","data":{},"extra":1}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MalformedEvent("unexpected field 'extra'".to_string())
        );
    }

    #[test]
    fn test_rejects_non_string_agent_id() {
        let err = EventMessage::parse(br#"{"event_type":"state_change","agent_id":7,"data":{}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("must be a string, got number"));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = EventMessage::parse(b"[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEvent(_)));
    }

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("unknown_thing"), None);
        assert_eq!(EventKind::parse("State_Change"), None);
    }

    #[test]
    fn test_to_json_parses_back() {
        let msg = EventMessage::new("dialogue", "npc-2", json!({"prompt": "hello"}));
        assert_eq!(EventMessage::parse(msg.to_json().as_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_too_large_response() {
        let err = ProtocolError::MessageTooLarge {
            size: 70000,
            limit: 65536,
        };
        assert_eq!(err.response(), "Error: message exceeds 65536 bytes");
    }
}
