//! Remote control gateway
//!
//! A small request/response protocol for a companion client: length-framed
//! JSON messages over TCP, one tag field discriminating the payload, plus a
//! UDP beacon for LAN discovery. The server exposes a point-in-time
//! snapshot of grid and OBS state and accepts tap/set-value/system
//! commands; the client side handles discovery racing, coalesced refresh
//! and throttled value pushes.

pub mod client;
pub mod discovery;
pub mod framing;
pub mod server;

use serde::{Deserialize, Serialize};

/// Service-type identifier carried by discovery announcements
pub const SERVICE_TYPE: &str = "_padgrid._tcp";

/// Requests accepted by the gateway server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayRequest {
    Snapshot,
    Tap { pad: usize },
    SetValue { pad: usize, normalized: f32 },
    System { action: SystemAction },
}

/// System-level actions without a pad argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    PreviousScene,
    NextScene,
    ToggleRecording,
    Refresh,
}

/// Responses produced by the gateway server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayResponse {
    Snapshot(RemoteSnapshot),
    Ack,
    Error { message: String },
}

/// Machine string sent when a request fails structural decode
pub const ERR_INVALID_REQUEST: &str = "invalid_request";
/// Machine string sent when a pad index or argument is unusable
pub const ERR_BAD_ARGUMENT: &str = "bad_argument";

/// Presentation style of a pad's trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStyle {
    /// Discrete press (note, program change, transport)
    Momentary,
    /// Live position or delta (CC, pitch bend, V-Pot, fader)
    Continuous,
    /// Nothing bound
    Empty,
}

/// One pad in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePad {
    pub id: usize,
    pub title: String,
    pub trigger_label: String,
    pub trigger_style: TriggerStyle,
    pub target_title: String,
    pub has_mapping: bool,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_value: Option<f32>,
}

/// Full point-in-time serialization of remote-controllable state.
///
/// Always rebuilt whole, never partially mutated. The
/// (server_started_at, generated_at) pair orders competing servers during
/// client-side endpoint racing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub app_name: String,
    /// Milliseconds since the Unix epoch
    pub generated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_scene_index: Option<usize>,
    pub recording_active: bool,
    pub pads: Vec<RemotePad>,
}

impl RemoteSnapshot {
    /// Racing key: prefer the longest-running server instance, then the
    /// freshest snapshot (lexicographic comparison).
    pub fn freshness(&self) -> (i64, i64) {
        (self.server_started_at.unwrap_or(0), self.generated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tag_discrimination() {
        let json = serde_json::to_string(&GatewayRequest::Tap { pad: 3 }).unwrap();
        assert!(json.contains(r#""type":"tap"#));
        let back: GatewayRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GatewayRequest::Tap { pad: 3 });

        let sys: GatewayRequest =
            serde_json::from_str(r#"{"type":"system","action":"next_scene"}"#).unwrap();
        assert_eq!(
            sys,
            GatewayRequest::System {
                action: SystemAction::NextScene
            }
        );
    }

    #[test]
    fn test_unknown_tag_fails_decode() {
        assert!(serde_json::from_str::<GatewayRequest>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<GatewayRequest>(r#"{"pad":1}"#).is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = RemoteSnapshot {
            app_name: "padgrid-gw".to_string(),
            generated_at: 1000,
            server_instance_id: Some("abc".to_string()),
            server_started_at: Some(500),
            scene_name: Some("Main".to_string()),
            scenes: Some(vec!["Main".to_string(), "Intro".to_string()]),
            current_scene_index: Some(0),
            recording_active: true,
            pads: vec![RemotePad {
                id: 0,
                title: "Pad 1".to_string(),
                trigger_label: "Note ch:1 n:60".to_string(),
                trigger_style: TriggerStyle::Momentary,
                target_title: "Scene Main".to_string(),
                has_mapping: true,
                status_text: "ready".to_string(),
                normalized_value: None,
            }],
        };

        let json = serde_json::to_string(&GatewayResponse::Snapshot(snapshot.clone())).unwrap();
        let back: GatewayResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GatewayResponse::Snapshot(snapshot));
    }

    #[test]
    fn test_freshness_ordering_prefers_started_then_generated() {
        let make = |started: Option<i64>, generated: i64| RemoteSnapshot {
            app_name: String::new(),
            generated_at: generated,
            server_instance_id: None,
            server_started_at: started,
            scene_name: None,
            scenes: None,
            current_scene_index: None,
            recording_active: false,
            pads: Vec::new(),
        };

        // Longer-running server wins regardless of snapshot age
        assert!(make(Some(100), 5).freshness() > make(Some(50), 999).freshness());
        // Tie on start time: freshest snapshot wins
        assert!(make(Some(100), 10).freshness() > make(Some(100), 9).freshness());
        // Absent start time sorts below any present one
        assert!(make(Some(1), 0).freshness() > make(None, 50).freshness());
    }
}
