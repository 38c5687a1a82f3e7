use serde::Serialize;
use serde_json::Value;

use crate::bridge_logic::error::BadRequest;

/// Unix milliseconds, the timestamp unit used on every wire surface.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One normalized broker delivery. Constructed exactly once per delivery
/// and shared by reference with every connected client; `ts` is receipt
/// time, not broker-provided time.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePacket {
    pub topic: String,
    pub payload: String,
    pub ts: i64,
}

impl MessagePacket {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ts: now_millis(),
        }
    }
}

/// The single envelope sent to a realtime client right after its handshake,
/// giving it a time baseline. Never repeated.
#[derive(Debug, Clone, Serialize)]
pub struct Greeting {
    pub r#type: &'static str,
    pub now: i64,
}

impl Greeting {
    pub fn connected() -> Self {
        Self {
            r#type: "connected",
            now: now_millis(),
        }
    }
}

/// A validated publish request: topic plus the canonical text payload that
/// goes onto the broker wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishBody {
    pub topic: String,
    pub payload: String,
}

impl PublishBody {
    /// Accepts `{ "topic": <string>, "payload": <any present value> }`.
    /// The topic must be a non-empty string; the payload may be any JSON
    /// value and is canonicalized to text
    /// (`JSON.stringify` semantics: strings pass through unquoted, anything
    /// else is serialized, including `null`).
    pub fn from_value(body: &Value) -> Result<Self, BadRequest> {
        let topic = match body.get("topic").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(BadRequest),
        };
        let payload = match body.get("payload") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(BadRequest),
        };
        Ok(Self { topic, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn packet_serializes_to_wire_shape() {
        let packet = MessagePacket {
            topic: "sensors/temp".to_string(),
            payload: "21.5".to_string(),
            ts: 1700000000000,
        };
        let wire = serde_json::to_value(&packet).expect("packet json");
        assert_eq!(
            wire,
            json!({ "topic": "sensors/temp", "payload": "21.5", "ts": 1700000000000_i64 })
        );
    }

    #[test]
    fn greeting_has_type_and_now_only() {
        let wire = serde_json::to_value(Greeting::connected()).expect("greeting json");
        let obj = wire.as_object().expect("object");
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["type"], "connected");
        assert!(obj["now"].is_i64());
    }

    #[test]
    fn string_payload_passes_through() {
        let body = json!({ "topic": "cmd/light", "payload": "on" });
        let parsed = PublishBody::from_value(&body).expect("valid body");
        assert_eq!(parsed.topic, "cmd/light");
        assert_eq!(parsed.payload, "on");
    }

    #[test]
    fn structured_payload_is_canonicalized_to_json_text() {
        let body = json!({ "topic": "cmd/light", "payload": { "on": true } });
        let parsed = PublishBody::from_value(&body).expect("valid body");
        assert_eq!(parsed.payload, r#"{"on":true}"#);
    }

    #[test]
    fn null_payload_is_present_and_becomes_text() {
        let body = json!({ "topic": "cmd/light", "payload": null });
        let parsed = PublishBody::from_value(&body).expect("null is a present payload");
        assert_eq!(parsed.payload, "null");
    }

    #[test]
    fn missing_topic_is_rejected() {
        assert!(PublishBody::from_value(&json!({ "payload": "x" })).is_err());
        assert!(PublishBody::from_value(&json!({ "topic": "", "payload": "x" })).is_err());
        assert!(PublishBody::from_value(&json!({ "topic": 7, "payload": "x" })).is_err());
    }

    #[test]
    fn missing_payload_is_rejected() {
        assert!(PublishBody::from_value(&json!({ "topic": "cmd/light" })).is_err());
    }
}
