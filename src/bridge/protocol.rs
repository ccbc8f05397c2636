//! OBS WebSocket v5 wire protocol: message envelopes and authentication
//!
//! Every frame is a JSON object with an opcode field `op` and a payload
//! field `d`. We consume Hello (0), Identified (2), Event (5) and
//! RequestResponse (7), and produce Identify (1) and Request (6).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const OP_HELLO: u64 = 0;
pub const OP_IDENTIFY: u64 = 1;
pub const OP_IDENTIFIED: u64 = 2;
pub const OP_EVENT: u64 = 5;
pub const OP_REQUEST: u64 = 6;
pub const OP_REQUEST_RESPONSE: u64 = 7;

/// RPC version this client speaks
pub const RPC_VERSION: u64 = 1;

/// Event subscription bitmask: General | Scenes | Inputs | Outputs | SceneItems
pub const EVENT_SUBSCRIPTIONS: u64 = 1 | 4 | 8 | 64 | 128;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unsupported opcode {0}")]
    UnsupportedOp(u64),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Authentication challenge carried by Hello when the server requires auth
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloData {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    #[serde(default)]
    pub rpc_version: Option<u64>,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponseData {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

/// A decoded server-to-client frame
#[derive(Debug)]
pub enum ServerMessage {
    Hello(HelloData),
    Identified,
    Event { event_type: String, event_data: Value },
    RequestResponse(RequestResponseData),
}

/// Decode one incoming JSON text frame
pub fn decode_frame(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let op = value
        .get("op")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Malformed("missing op".to_string()))?;
    let d = value
        .get("d")
        .cloned()
        .ok_or_else(|| ProtocolError::Malformed("missing d".to_string()))?;

    match op {
        OP_HELLO => Ok(ServerMessage::Hello(serde_json::from_value(d)?)),
        OP_IDENTIFIED => Ok(ServerMessage::Identified),
        OP_EVENT => {
            let event_type = d
                .get("eventType")
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::Malformed("event without eventType".to_string()))?
                .to_string();
            let event_data = d.get("eventData").cloned().unwrap_or(Value::Null);
            Ok(ServerMessage::Event {
                event_type,
                event_data,
            })
        }
        OP_REQUEST_RESPONSE => Ok(ServerMessage::RequestResponse(serde_json::from_value(d)?)),
        other => Err(ProtocolError::UnsupportedOp(other)),
    }
}

/// Build an Identify (op 1) frame
pub fn identify_frame(authentication: Option<String>) -> String {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": EVENT_SUBSCRIPTIONS,
    });
    if let Some(auth) = authentication {
        d["authentication"] = Value::String(auth);
    }

    json!({ "op": OP_IDENTIFY, "d": d }).to_string()
}

/// Build a Request (op 6) frame
pub fn request_frame(request_type: &str, request_id: &str, request_data: Option<Value>) -> String {
    let mut d = json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if let Some(data) = request_data {
        d["requestData"] = data;
    }

    json!({ "op": OP_REQUEST, "d": d }).to_string()
}

/// Compute the authentication response string.
///
/// Two chained salted hash rounds: `base64(sha256(password + salt))`, then
/// `base64(sha256(secret + challenge))`.
pub fn auth_response(password: &str, challenge: &AuthChallenge) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, challenge.salt)));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge.challenge)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_known_vector() {
        let challenge = AuthChallenge {
            challenge: "ytN0tj09zeZKNG3b0Cm+UyKBjYhlvkWnnN1KIOn9xRI=".to_string(),
            salt: "PZVbYpvAnZut2SS6JNJytDm9".to_string(),
        };
        assert_eq!(
            auth_response("supersecret", &challenge),
            "oM4udEKCTDoOB6hRJnXAPVI95Hg8GiQxCl1gTwDzE5k="
        );
    }

    #[test]
    fn test_decode_hello_with_auth() {
        let text = r#"{"op":0,"d":{"obsWebSocketVersion":"5.3.0","rpcVersion":1,
            "authentication":{"challenge":"abc","salt":"xyz"}}}"#;
        match decode_frame(text).unwrap() {
            ServerMessage::Hello(hello) => {
                assert_eq!(hello.rpc_version, Some(1));
                let auth = hello.authentication.unwrap();
                assert_eq!(auth.challenge, "abc");
                assert_eq!(auth.salt, "xyz");
            }
            other => panic!("expected Hello, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_hello_without_auth() {
        let text = r#"{"op":0,"d":{"rpcVersion":1}}"#;
        match decode_frame(text).unwrap() {
            ServerMessage::Hello(hello) => assert!(hello.authentication.is_none()),
            other => panic!("expected Hello, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_request_response() {
        let text = r#"{"op":7,"d":{"requestType":"GetSceneList","requestId":"r3",
            "requestStatus":{"result":true,"code":100},
            "responseData":{"scenes":[]}}}"#;
        match decode_frame(text).unwrap() {
            ServerMessage::RequestResponse(resp) => {
                assert_eq!(resp.request_id, "r3");
                assert!(resp.request_status.result);
                assert!(resp.response_data.is_some());
            }
            other => panic!("expected RequestResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_event() {
        let text = r#"{"op":5,"d":{"eventType":"RecordStateChanged",
            "eventData":{"outputActive":true}}}"#;
        match decode_frame(text).unwrap() {
            ServerMessage::Event {
                event_type,
                event_data,
            } => {
                assert_eq!(event_type, "RecordStateChanged");
                assert_eq!(event_data["outputActive"], true);
            }
            other => panic!("expected Event, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_are_errors_not_panics() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"d":{}}"#).is_err());
        assert!(decode_frame(r#"{"op":3,"d":{}}"#).is_err());
    }

    #[test]
    fn test_request_frame_shape() {
        let frame = request_frame("SetCurrentProgramScene", "r7", Some(json!({"sceneUuid":"u1"})));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["op"], 6);
        assert_eq!(value["d"]["requestType"], "SetCurrentProgramScene");
        assert_eq!(value["d"]["requestId"], "r7");
        assert_eq!(value["d"]["requestData"]["sceneUuid"], "u1");
    }

    #[test]
    fn test_identify_frame_omits_auth_when_absent() {
        let value: Value = serde_json::from_str(&identify_frame(None)).unwrap();
        assert_eq!(value["op"], 1);
        assert!(value["d"].get("authentication").is_none());

        let value: Value =
            serde_json::from_str(&identify_frame(Some("tok".to_string()))).unwrap();
        assert_eq!(value["d"]["authentication"], "tok");
    }
}
