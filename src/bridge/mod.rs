//! OBS control-plane bridge
//!
//! Public handle over the private session task. The pipeline talks to the
//! bridge through fire-and-forget request submissions (queued internally
//! until the session is identified) and synchronous reads of the shared
//! cache. Teardown and reconnect are idempotent.

pub mod cache;
pub mod protocol;
pub mod session;
pub mod volume;

use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

pub use cache::{BridgeCache, BridgeNotification, SceneEntry};
pub use session::{ConnectionState, SessionConfig};

use session::{BridgeCommand, OutboundRequest, Session};

/// Handle to the OBS bridge. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct ObsBridge {
    cmd_tx: mpsc::UnboundedSender<BridgeCommand>,
    cache: Arc<BridgeCache>,
}

impl ObsBridge {
    /// Create the bridge and spawn its session task. The session dials
    /// lazily on first outbound demand.
    pub fn new(config: SessionConfig) -> Self {
        let cache = Arc::new(BridgeCache::new());
        let cmd_tx = Session::spawn(config, Arc::clone(&cache));
        Self { cmd_tx, cache }
    }

    pub fn cache(&self) -> &Arc<BridgeCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.cache.subscribe()
    }

    fn submit(&self, request: OutboundRequest) {
        // Session gone means shutdown in progress; drop silently
        let _ = self.cmd_tx.send(BridgeCommand::Submit(request));
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Switch the program scene by UUID
    pub fn set_scene_by_uuid(&self, uuid: &str) {
        self.submit(OutboundRequest::new(
            "SetCurrentProgramScene",
            Some(json!({ "sceneUuid": uuid })),
        ));
    }

    /// Step the program scene relative to the current one (+1 next, -1
    /// previous). Clamped to the catalog ends.
    pub fn step_scene(&self, offset: isize) {
        if let Some(scene) = self.cache.scene_at_offset(offset) {
            self.set_scene_by_uuid(&scene.uuid);
        } else {
            debug!("step_scene({}): no scene catalog yet", offset);
        }
    }

    pub fn toggle_record(&self) {
        self.submit(OutboundRequest::new("ToggleRecord", None));
    }

    /// Absolute volume: map the normalized position through the dB curve
    /// and couple mute at the zero boundary. Volume request goes out first,
    /// then the mute request when the desired state differs from the cache.
    pub fn set_volume_position(&self, input: &str, position: f32) {
        let mul = volume::position_to_mul(position);
        self.cache.set_volume(input, mul);
        self.submit(OutboundRequest::new(
            "SetInputVolume",
            Some(json!({ "inputName": input, "inputVolumeMul": mul })),
        ));

        let want_muted = position <= volume::MUTE_COUPLING_POSITION;
        if want_muted != self.cache.is_muted(input) {
            self.submit(OutboundRequest::new(
                "SetInputMute",
                Some(json!({ "inputName": input, "inputMuted": want_muted })),
            ));
        }
    }

    /// Relative volume: bounded dB increment accumulated against the last
    /// known multiplier. The cache is updated immediately so consecutive
    /// deltas compound before the remote confirms.
    pub fn adjust_volume(&self, input: &str, delta: i32) {
        let current = self.cache.volume_mul(input).unwrap_or(1.0);
        let mul = volume::apply_relative(current, delta);
        self.cache.set_volume(input, mul);
        self.submit(OutboundRequest::new(
            "SetInputVolume",
            Some(json!({ "inputName": input, "inputVolumeMul": mul })),
        ));
    }

    /// Re-request the remote catalog (scene list, inputs, record status)
    pub fn refresh_catalog(&self) {
        self.submit(
            OutboundRequest::new("GetSceneList", None)
                .quiet()
                .with_handler(Box::new(session::seed_scene_list)),
        );
        self.submit(
            OutboundRequest::new("GetInputList", None)
                .quiet()
                .with_handler(Box::new(session::seed_input_list)),
        );
        self.submit(
            OutboundRequest::new("GetRecordStatus", None)
                .quiet()
                .with_handler(Box::new(session::seed_record_status)),
        );
    }

    /// Tear down and re-dial (settings change). Idempotent.
    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::Reconnect);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::Shutdown);
    }
}
