//! Plugin registry: the closed set of action integrations
//!
//! Only two concrete plugins exist, so the registry is a closed enum rather
//! than open-ended dynamic dispatch. Each plugin exposes a list of named
//! targets; the OBS plugin's scene targets are dynamic (refreshed from the
//! bridge catalog), flagged through [`PluginId::has_dynamic_targets`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of an integration plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginId {
    /// OBS Studio control plane (scenes, recording, volume)
    Obs,
    /// Console logger (prints dispatches; useful for mapping dry-runs)
    Console,
}

impl PluginId {
    /// The plugin new mappings default to
    pub const DEFAULT: PluginId = PluginId::Obs;

    pub fn name(&self) -> &'static str {
        match self {
            PluginId::Obs => "obs",
            PluginId::Console => "console",
        }
    }

    /// Whether this plugin's target list changes at runtime (e.g. the OBS
    /// scene catalog). Static-target plugins can cache their list forever.
    pub fn has_dynamic_targets(&self) -> bool {
        matches!(self, PluginId::Obs)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical binding from a grid cell to an action on a plugin.
///
/// `target` uses the plugin's target-identifier scheme. For OBS:
/// `scene:<uuid>` switches scenes, `record:toggle` toggles recording,
/// `volume:<input>` drives an input's volume. The superseded name-based
/// scheme (`scene-name:<name>`) is rejected on load by the persistence
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub plugin: PluginId,
    pub target: String,
}

impl ControlMapping {
    pub fn new(plugin: PluginId, target: impl Into<String>) -> Self {
        Self {
            plugin,
            target: target.into(),
        }
    }

    /// The OBS recording-toggle target (default for Mackie Record learns)
    pub fn record_toggle() -> Self {
        Self::new(PluginId::Obs, TARGET_RECORD_TOGGLE)
    }

    /// Human-readable title for UI/snapshot purposes
    pub fn title(&self) -> String {
        match self.target.split_once(':') {
            Some(("scene", id)) => format!("Scene {}", id),
            Some(("record", _)) => "Toggle Recording".to_string(),
            Some(("volume", input)) => format!("Volume: {}", input),
            _ => self.target.clone(),
        }
    }
}

impl fmt::Display for ControlMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin, self.target)
    }
}

/// Target scheme prefixes
pub const TARGET_SCENE_PREFIX: &str = "scene:";
pub const TARGET_VOLUME_PREFIX: &str = "volume:";
pub const TARGET_RECORD_TOGGLE: &str = "record:toggle";

/// Superseded name-based scene scheme, dropped on load
pub const LEGACY_SCENE_PREFIX: &str = "scene-name:";

/// Whether a persisted target uses a superseded identifier scheme
pub fn is_legacy_target(target: &str) -> bool {
    target.starts_with(LEGACY_SCENE_PREFIX)
}
