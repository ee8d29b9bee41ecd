use serde::Serialize;
use serde_json::Value;

/// Response body for push/broadcast control requests.
///
/// Success serializes as `{"ok":true}`, failure carries an error string.
#[derive(Debug, Serialize)]
pub struct PushAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushAck {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn invalid_json() -> Self {
        Self {
            ok: false,
            error: Some("Invalid JSON".to_string()),
        }
    }
}

/// Health response body for `GET /`.
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

impl Health {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// The one-time acknowledgment sent to every subscriber on connect,
/// before any relayed message.
pub fn connect_ack() -> String {
    serde_json::json!({ "message": "Connected to bid updates" }).to_string()
}

/// Extract the relay payload from an inbound control request body.
///
/// A JSON object carrying a `message` key relays that key's value (even
/// `null` — presence decides, not truthiness). Anything else, including
/// scalars and arrays, is relayed whole. Other fields such as `userId`
/// are accepted but have no routing effect.
pub fn unwrap_envelope(mut payload: Value) -> Value {
    match payload.as_object_mut().and_then(|map| map.remove("message")) {
        Some(inner) => inner,
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ack_accepted_serializes_without_error_field() {
        let json = serde_json::to_string(&PushAck::accepted()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }

    #[test]
    fn push_ack_invalid_json_body() {
        let json = serde_json::to_string(&PushAck::invalid_json()).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"Invalid JSON"}"#);
    }

    #[test]
    fn health_body() {
        let json = serde_json::to_string(&Health::ok()).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }

    #[test]
    fn connect_ack_exact_text() {
        assert_eq!(connect_ack(), r#"{"message":"Connected to bid updates"}"#);
    }

    #[test]
    fn unwrap_envelope_extracts_message_field() {
        let payload = serde_json::json!({ "userId": "u1", "message": { "bid": 100 } });
        let out = unwrap_envelope(payload);
        assert_eq!(out, serde_json::json!({ "bid": 100 }));
    }

    #[test]
    fn unwrap_envelope_relays_whole_object_without_message() {
        let payload = serde_json::json!({ "bid": 250, "auctionId": 7 });
        let out = unwrap_envelope(payload.clone());
        assert_eq!(out, payload);
    }

    #[test]
    fn unwrap_envelope_null_message_is_present() {
        let payload = serde_json::json!({ "message": null });
        assert_eq!(unwrap_envelope(payload), Value::Null);
    }

    #[test]
    fn unwrap_envelope_passes_scalars_through() {
        assert_eq!(unwrap_envelope(serde_json::json!(5)), serde_json::json!(5));
        assert_eq!(
            unwrap_envelope(serde_json::json!("text")),
            serde_json::json!("text")
        );
        assert_eq!(
            unwrap_envelope(serde_json::json!([1, 2])),
            serde_json::json!([1, 2])
        );
    }
}
