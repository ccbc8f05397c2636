//! Event-driven cache of remote OBS state
//!
//! Seeded by the initial catalog refresh after Identify and kept current by
//! push events. Reads are synchronous and cheap (short parking_lot critical
//! sections) so the pipeline and gateway snapshot generation can consult it
//! without blocking. Change notifications fire exactly when a value
//! actually changes; re-announcements of an unchanged value are swallowed.

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// One scene in the remote catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneEntry {
    pub uuid: String,
    pub name: String,
}

/// State-change notifications visible to the rest of the system
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeNotification {
    RecordingChanged(bool),
    InputMuteChanged { input: String, muted: bool },
    SceneChanged { uuid: String, name: String },
    /// The catalog was replaced or invalidated; dependents must re-read
    CatalogChanged,
}

/// Shared cache of scenes, inputs, volume and recording state
pub struct BridgeCache {
    /// Program order as reported by the remote (display order)
    scenes: RwLock<Vec<SceneEntry>>,
    current_scene: RwLock<Option<SceneEntry>>,
    inputs: RwLock<Vec<String>>,
    volumes: RwLock<HashMap<String, f32>>,
    mutes: RwLock<HashMap<String, bool>>,
    recording: RwLock<bool>,
    notify_tx: broadcast::Sender<BridgeNotification>,
}

impl BridgeCache {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            scenes: RwLock::new(Vec::new()),
            current_scene: RwLock::new(None),
            inputs: RwLock::new(Vec::new()),
            volumes: RwLock::new(HashMap::new()),
            mutes: RwLock::new(HashMap::new()),
            recording: RwLock::new(false),
            notify_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.notify_tx.subscribe()
    }

    fn notify(&self, notification: BridgeNotification) {
        // Best-effort: no subscribers is fine
        let _ = self.notify_tx.send(notification);
    }

    // ------------------------------------------------------------------
    // Writes (session task only)
    // ------------------------------------------------------------------

    pub fn set_scene_list(&self, scenes: Vec<SceneEntry>) {
        *self.scenes.write() = scenes;
        self.notify(BridgeNotification::CatalogChanged);
    }

    pub fn set_current_scene(&self, uuid: String, name: String) {
        let entry = SceneEntry { uuid, name };
        let changed = {
            let mut current = self.current_scene.write();
            if current.as_ref() == Some(&entry) {
                false
            } else {
                *current = Some(entry.clone());
                true
            }
        };

        if changed {
            self.notify(BridgeNotification::SceneChanged {
                uuid: entry.uuid,
                name: entry.name,
            });
        }
    }

    pub fn set_inputs(&self, inputs: Vec<String>) {
        *self.inputs.write() = inputs;
        self.notify(BridgeNotification::CatalogChanged);
    }

    pub fn set_volume(&self, input: &str, mul: f32) {
        self.volumes.write().insert(input.to_string(), mul);
    }

    /// Record a mute state, notifying only on actual change
    pub fn set_mute(&self, input: &str, muted: bool) {
        let changed = {
            let mut mutes = self.mutes.write();
            mutes.insert(input.to_string(), muted) != Some(muted)
        };

        if changed {
            self.notify(BridgeNotification::InputMuteChanged {
                input: input.to_string(),
                muted,
            });
        }
    }

    /// Record recording state, notifying only on actual change
    pub fn set_recording(&self, active: bool) {
        let changed = {
            let mut recording = self.recording.write();
            if *recording == active {
                false
            } else {
                *recording = active;
                true
            }
        };

        if changed {
            self.notify(BridgeNotification::RecordingChanged(active));
        }
    }

    /// Forget everything (disconnect). Emits a catalog-changed notification
    /// so dependents invalidate rather than showing stale data.
    pub fn clear_all(&self) {
        self.scenes.write().clear();
        *self.current_scene.write() = None;
        self.inputs.write().clear();
        self.volumes.write().clear();
        self.mutes.write().clear();
        *self.recording.write() = false;
        debug!("bridge cache cleared");
        self.notify(BridgeNotification::CatalogChanged);
    }

    // ------------------------------------------------------------------
    // Reads (any context; point-in-time)
    // ------------------------------------------------------------------

    pub fn scenes(&self) -> Vec<SceneEntry> {
        self.scenes.read().clone()
    }

    pub fn current_scene(&self) -> Option<SceneEntry> {
        self.current_scene.read().clone()
    }

    pub fn current_scene_index(&self) -> Option<usize> {
        // Lock order: scenes before current_scene, same as scene_at_offset
        let scenes = self.scenes.read();
        let current = self.current_scene.read();
        let current = current.as_ref()?;
        scenes.iter().position(|s| s.uuid == current.uuid)
    }

    pub fn first_scene(&self) -> Option<SceneEntry> {
        self.scenes.read().first().cloned()
    }

    pub fn scene_by_uuid(&self, uuid: &str) -> Option<SceneEntry> {
        self.scenes.read().iter().find(|s| s.uuid == uuid).cloned()
    }

    /// The scene `offset` steps away from the current one, clamped to the
    /// list ends (no wrap-around)
    pub fn scene_at_offset(&self, offset: isize) -> Option<SceneEntry> {
        let scenes = self.scenes.read();
        if scenes.is_empty() {
            return None;
        }

        let current = self
            .current_scene
            .read()
            .as_ref()
            .and_then(|c| scenes.iter().position(|s| s.uuid == c.uuid))
            .unwrap_or(0);

        let target = (current as isize + offset).clamp(0, scenes.len() as isize - 1) as usize;
        scenes.get(target).cloned()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.read().clone()
    }

    pub fn volume_mul(&self, input: &str) -> Option<f32> {
        self.volumes.read().get(input).copied()
    }

    pub fn is_muted(&self, input: &str) -> bool {
        self.mutes.read().get(input).copied().unwrap_or(false)
    }

    pub fn recording(&self) -> bool {
        *self.recording.read()
    }
}

impl Default for BridgeCache {
    fn default() -> Self {
        Self::new()
    }
}
