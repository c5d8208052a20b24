use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};

pub const EVENT_START: &str = "stream:start";
pub const EVENT_CHUNK: &str = "stream:chunk";
pub const EVENT_END: &str = "stream:end";

/// Where the stream is being recorded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Identity of an upload session, fixed by the start handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamIdentity {
    pub user_id: u64,
    pub session_id: String,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    pub cancelled: bool,
}

/// Accept `{success: true, ...}` as-is; turn anything else into the
/// server-supplied error
pub fn check_ack(body: Value) -> RelayResult<Value> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    Err(RelayError::Protocol(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_wire_shape() {
        let identity = StreamIdentity {
            user_id: 42,
            session_id: "sess-1".to_string(),
            location: Location { lat: 0.0, lng: 0.0 },
        };

        assert_eq!(
            serde_json::to_value(&identity).unwrap(),
            json!({ "userId": 42, "sessionId": "sess-1", "location": { "lat": 0.0, "lng": 0.0 } })
        );
    }

    #[test]
    fn test_success_ack_passes_through() {
        let body = json!({ "success": true, "id": "sess-1" });
        assert_eq!(check_ack(body.clone()).unwrap(), body);
    }

    #[test]
    fn test_failure_ack_uses_server_message() {
        let err = check_ack(json!({ "success": false, "error": "quota exceeded" })).unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[test]
    fn test_ack_without_success_flag_fails() {
        let err = check_ack(json!({ "id": "x" })).unwrap_err();
        assert_eq!(err, RelayError::Protocol("request failed".to_string()));
    }
}
