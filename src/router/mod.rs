//! Router: the event-ingestion pipeline orchestrator
//!
//! Owns the grid, the mode classifier and the dispatch debouncer, and
//! wires parsed events through matching, learn capture, debouncing and
//! plugin dispatch. Raw bytes arrive over a channel from the MIDI delivery
//! threads so all pipeline state is mutated from one logical owner; the
//! gateway reads point-in-time snapshots through short read locks.

pub mod debounce;


use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::{volume, BridgeNotification, ObsBridge};
use crate::config::Tunables;
use crate::gateway::{RemotePad, RemoteSnapshot, SystemAction, TriggerStyle};
use crate::grid::persistence::PadBindings;
use crate::grid::{Grid, GridError};
use crate::midi::classifier::{
    advance_phase, mackie_delta, signed_bit_delta, ControlKey, ControlMode, ModeClassifier,
};
use crate::midi::parser::parse;
use crate::midi::sources::SourceMessage;
use crate::midi::{Event, EventKind, Trigger};
use crate::plugins::{
    ControlMapping, PluginId, TARGET_RECORD_TOGGLE, TARGET_SCENE_PREFIX, TARGET_VOLUME_PREFIX,
};

use debounce::DispatchDebouncer;

/// A dispatch decision computed under the grid lock, executed after it
struct PendingDispatch {
    cell: usize,
    mapping: ControlMapping,
    mode: ControlMode,
}

/// Central orchestrator for the MIDI -> OBS pipeline
pub struct Router {
    grid: RwLock<Grid>,
    classifier: Arc<Mutex<ModeClassifier>>,
    debouncer: Mutex<DispatchDebouncer>,
    bridge: ObsBridge,
    bindings_path: PathBuf,
    instance_id: String,
    started_at_ms: i64,
}

impl Router {
    pub fn new(bridge: ObsBridge, tunables: &Tunables, bindings_path: PathBuf) -> Self {
        let started_at_ms = Utc::now().timestamp_millis();
        Self {
            grid: RwLock::new(Grid::new()),
            classifier: Arc::new(Mutex::new(ModeClassifier::new())),
            debouncer: Mutex::new(DispatchDebouncer::new(Duration::from_millis(
                tunables.debounce_ms,
            ))),
            bridge,
            bindings_path,
            instance_id: format!("{}-{}", std::process::id(), started_at_ms),
            started_at_ms,
        }
    }

    pub fn bridge(&self) -> &ObsBridge {
        &self.bridge
    }

    // ------------------------------------------------------------------
    // Pipeline entry points
    // ------------------------------------------------------------------

    /// Handle one message from the source layer
    pub async fn handle_source_message(&self, message: SourceMessage) {
        match message {
            SourceMessage::Data {
                source_id,
                source_name,
                bytes,
            } => {
                self.process_bytes(&bytes, &source_name, source_id).await;
            }
            SourceMessage::Disconnected { source_id } => {
                self.classifier.lock().reset_source(source_id);
            }
        }
    }

    /// Parse a raw buffer and run every resulting event through the pipeline
    pub async fn process_bytes(&self, bytes: &[u8], source_name: &str, source_id: u32) {
        for event in parse(bytes, source_name, source_id) {
            self.process_event(event).await;
        }
    }

    /// Run one classified event through learn capture or match/dispatch
    pub async fn process_event(&self, event: Event) {
        let mode = self.classify(&event);

        // Learn capture: bind instead of dispatching, but keep the preview
        // and presentation state live
        if self.grid.read().is_capturing() {
            let captured = {
                let mut grid = self.grid.write();
                let default = Self::synthesized_default(&self.bridge, &event);
                let captured = grid.capture(&event, default).unwrap_or(None);
                if let Some(index) = captured {
                    Self::update_presentation(&mut grid, index, &event, mode);
                }
                captured
            };

            if captured.is_some() {
                self.save_bindings().await;
            }
            return;
        }

        let Some(trigger) = event.trigger() else {
            debug!("ignoring event without trigger identity: {}", event.kind);
            return;
        };

        // Match, update presentation, and collect dispatches under one
        // short write lock
        let dispatches: Vec<PendingDispatch> = {
            let mut grid = self.grid.write();
            let matches = grid.matching_cells(trigger, event.source_id, &event.source_name);

            matches
                .into_iter()
                .filter_map(|index| {
                    Self::update_presentation(&mut grid, index, &event, mode);
                    let mapping = grid.cell(index).ok()?.mapping.clone()?;
                    Some(PendingDispatch {
                        cell: index,
                        mapping,
                        mode,
                    })
                })
                .collect()
        };

        for dispatch in dispatches {
            let accepted = self.debouncer.lock().should_dispatch(&event, dispatch.cell);
            if !accepted {
                debug!("debounced {} for cell {}", event.kind, dispatch.cell);
                continue;
            }

            self.dispatch(&dispatch, &event);
        }
    }

    /// Feed the classifier for continuous controller kinds
    fn classify(&self, event: &Event) -> ControlMode {
        match event.kind {
            EventKind::ControlChange {
                channel,
                controller,
                value,
            } => self.classifier.lock().observe(
                ControlKey {
                    source_id: event.source_id,
                    channel,
                    controller,
                },
                value,
            ),
            EventKind::MackieVPot { index, value } => self.classifier.lock().observe(
                ControlKey {
                    source_id: event.source_id,
                    channel: 0,
                    // V-Pots live in the MCU encoder CC range
                    controller: 16 + index,
                },
                value,
            ),
            EventKind::PitchBend { .. } | EventKind::MackieFader { .. } => ControlMode::Absolute,
            _ => ControlMode::Unknown,
        }
    }

    /// Update a cell's presentation state for one event
    fn update_presentation(grid: &mut Grid, index: usize, event: &Event, mode: ControlMode) {
        let Ok(cell) = grid.cell_mut(index) else {
            return;
        };

        cell.last_event = Some(event.clone());
        cell.last_activity = Some(event.timestamp);
        cell.mode = mode;

        match event.kind {
            EventKind::NoteOn { velocity, .. } => {
                cell.fill = f32::from(velocity) / 127.0;
            }
            EventKind::ControlChange { value, .. } | EventKind::MackieVPot { value, .. } => {
                if mode == ControlMode::Relative {
                    // Presentation path uses the signed-bit form for both
                    // families; dispatch uses the per-family encoding
                    let delta = signed_bit_delta(value);
                    cell.phase = advance_phase(cell.phase, delta);
                    cell.direction = delta.signum() as i8;
                } else {
                    cell.fill = f32::from(value) / 127.0;
                    cell.direction = 0;
                }
            }
            EventKind::PitchBend { value, .. } | EventKind::MackieFader { value, .. } => {
                cell.fill = f32::from(value.min(16383)) / 16383.0;
            }
            EventKind::ProgramChange { .. }
            | EventKind::MackieTransport { .. }
            | EventKind::Unknown { .. } => {}
        }
    }

    /// Execute one accepted dispatch against its plugin
    fn dispatch(&self, pending: &PendingDispatch, event: &Event) {
        match pending.mapping.plugin {
            PluginId::Console => {
                info!(
                    "🖥️  cell {} -> console: {} ({})",
                    pending.cell, pending.mapping.target, event.kind
                );
            }
            PluginId::Obs => self.dispatch_obs(pending, event),
        }
    }

    fn dispatch_obs(&self, pending: &PendingDispatch, event: &Event) {
        let target = pending.mapping.target.as_str();

        if let Some(uuid) = target.strip_prefix(TARGET_SCENE_PREFIX) {
            // Scene switches are edge actions; continuous streams would
            // re-fire them on every sample
            if event.kind.is_discrete() {
                debug!("cell {} -> scene {}", pending.cell, uuid);
                self.bridge.set_scene_by_uuid(uuid);
            }
        } else if target == TARGET_RECORD_TOGGLE {
            if event.kind.is_discrete() {
                debug!("cell {} -> toggle recording", pending.cell);
                self.bridge.toggle_record();
            }
        } else if let Some(input) = target.strip_prefix(TARGET_VOLUME_PREFIX) {
            self.dispatch_volume(input, pending, event);
        } else {
            warn!("cell {} has unknown OBS target '{}'", pending.cell, target);
        }
    }

    /// Volume duality: absolute controllers set a position through the dB
    /// curve, relative controllers nudge the last known value. Each family
    /// uses its canonical delta encoding.
    fn dispatch_volume(&self, input: &str, pending: &PendingDispatch, event: &Event) {
        match event.kind {
            EventKind::ControlChange { value, .. } => match pending.mode {
                ControlMode::Relative => {
                    self.bridge.adjust_volume(input, signed_bit_delta(value));
                }
                _ => {
                    self.bridge
                        .set_volume_position(input, f32::from(value) / 127.0);
                }
            },
            EventKind::MackieVPot { value, .. } => match pending.mode {
                ControlMode::Absolute => {
                    self.bridge
                        .set_volume_position(input, f32::from(value) / 127.0);
                }
                // V-Pots default to relative; MCU 6-bit sign-magnitude
                _ => {
                    self.bridge.adjust_volume(input, mackie_delta(value));
                }
            },
            EventKind::PitchBend { value, .. } | EventKind::MackieFader { value, .. } => {
                self.bridge
                    .set_volume_position(input, f32::from(value.min(16383)) / 16383.0);
            }
            _ => {}
        }
    }

    /// Reacts to bridge notifications: a cleared catalog invalidates the
    /// classifier evidence along with everything else connection-scoped.
    pub fn spawn_notification_task(&self) {
        let classifier = Arc::clone(&self.classifier);
        let bridge = self.bridge.clone();
        let mut rx = bridge.subscribe();

        tokio::spawn(async move {
            while let Ok(notification) = rx.recv().await {
                if notification == BridgeNotification::CatalogChanged
                    && bridge.cache().scenes().is_empty()
                {
                    classifier.lock().reset_all();
                    debug!("catalog cleared; classifier evidence reset");
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Learn mode and binding management
    // ------------------------------------------------------------------

    pub fn set_learn_mode(&self, enabled: bool) {
        self.grid.write().set_learn_mode(enabled);
    }

    pub fn learn_mode(&self) -> bool {
        self.grid.read().learn_mode()
    }

    pub fn set_learn_target(&self, index: usize) -> Result<(), GridError> {
        self.grid.write().set_learn_target(index)
    }

    pub async fn clear_cell(&self, index: usize) -> Result<(), GridError> {
        self.grid.write().clear_cell(index)?;
        self.save_bindings().await;
        Ok(())
    }

    pub async fn assign_mapping(
        &self,
        index: usize,
        mapping: ControlMapping,
    ) -> Result<(), GridError> {
        self.grid.write().assign_mapping(index, mapping)?;
        self.save_bindings().await;
        Ok(())
    }

    /// Default mapping for a freshly learned trigger: Mackie Record maps to
    /// the recording toggle; anything else gets the first scene in the
    /// catalog, falling back to the recording toggle when no catalog is
    /// cached yet.
    fn synthesized_default(bridge: &ObsBridge, event: &Event) -> Option<ControlMapping> {
        let trigger = event.trigger()?;
        let first_available = bridge
            .cache()
            .first_scene()
            .map(|scene| {
                ControlMapping::new(
                    PluginId::Obs,
                    format!("{}{}", TARGET_SCENE_PREFIX, scene.uuid),
                )
            })
            .or_else(|| Some(ControlMapping::record_toggle()));

        Grid::default_mapping_for(trigger, first_available)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Load bindings from disk. Mappings in a superseded target scheme are
    /// dropped with a one-time notice and the cleaned state is re-saved
    /// immediately.
    pub async fn load_bindings(&self) -> anyhow::Result<()> {
        if !tokio::fs::try_exists(&self.bindings_path)
            .await
            .unwrap_or(false)
        {
            debug!("no pad bindings file yet");
            return Ok(());
        }

        let bindings = PadBindings::load_from_file(&self.bindings_path).await?;
        let dropped = {
            let mut grid = self.grid.write();
            bindings.load_into_grid(&mut grid)?
        };

        if dropped > 0 {
            warn!(
                "⚠️  Dropped {} mapping(s) using a superseded target scheme; re-saving cleaned bindings",
                dropped
            );
            self.save_bindings().await;
        }

        info!("Pad bindings loaded");
        Ok(())
    }

    /// Persist current bindings; failures are logged, never fatal
    pub async fn save_bindings(&self) {
        let bindings = PadBindings::from_grid(&self.grid.read());
        if let Err(e) = bindings.save_to_file(&self.bindings_path).await {
            warn!("Failed to save pad bindings: {:#}", e);
        }
    }

    // ------------------------------------------------------------------
    // Gateway-facing operations
    // ------------------------------------------------------------------

    /// Activate a pad as if its discrete trigger fired (companion tap)
    pub fn tap(&self, pad: usize) -> Result<(), GridError> {
        let mapping = {
            let grid = self.grid.read();
            grid.cell(pad)?.mapping.clone()
        };

        let Some(mapping) = mapping else {
            debug!("tap on unmapped pad {}", pad);
            return Ok(());
        };

        match mapping.plugin {
            PluginId::Console => info!("🖥️  tap {} -> console: {}", pad, mapping.target),
            PluginId::Obs => {
                if let Some(uuid) = mapping.target.strip_prefix(TARGET_SCENE_PREFIX) {
                    self.bridge.set_scene_by_uuid(uuid);
                } else if mapping.target == TARGET_RECORD_TOGGLE {
                    self.bridge.toggle_record();
                }
                // Tap on a continuous (volume) target is a no-op; set_value
                // drives those
            }
        }

        Ok(())
    }

    /// Drive a pad's continuous target with a normalized value. The caller
    /// (gateway server) clamps to [0,1] before this point.
    pub fn set_value(&self, pad: usize, normalized: f32) -> Result<(), GridError> {
        debug_assert!((0.0..=1.0).contains(&normalized));

        let mapping = {
            let mut grid = self.grid.write();
            let cell = grid.cell_mut(pad)?;
            cell.fill = normalized;
            cell.mapping.clone()
        };

        if let Some(mapping) = mapping {
            if mapping.plugin == PluginId::Obs {
                if let Some(input) = mapping.target.strip_prefix(TARGET_VOLUME_PREFIX) {
                    self.bridge.set_volume_position(input, normalized);
                }
            }
        }

        Ok(())
    }

    /// System-level companion commands
    pub fn system(&self, action: SystemAction) {
        match action {
            SystemAction::PreviousScene => self.bridge.step_scene(-1),
            SystemAction::NextScene => self.bridge.step_scene(1),
            SystemAction::ToggleRecording => self.bridge.toggle_record(),
            SystemAction::Refresh => self.bridge.refresh_catalog(),
        }
    }

    // ------------------------------------------------------------------
    // Snapshot generation
    // ------------------------------------------------------------------

    /// Build a whole snapshot of current state. Point-in-time: short read
    /// locks only, safe to call concurrently with event processing.
    pub fn snapshot(&self, app_name: &str) -> RemoteSnapshot {
        let cache = self.bridge.cache();
        let scenes = cache.scenes();
        let current_scene = cache.current_scene();

        let pads = {
            let grid = self.grid.read();
            grid.cells()
                .iter()
                .enumerate()
                .map(|(id, cell)| {
                    let trigger_style = match cell.trigger {
                        None => TriggerStyle::Empty,
                        Some(
                            Trigger::Note { .. }
                            | Trigger::ProgramChange { .. }
                            | Trigger::MackieTransport { .. },
                        ) => TriggerStyle::Momentary,
                        Some(_) => TriggerStyle::Continuous,
                    };

                    let target_title = cell
                        .mapping
                        .as_ref()
                        .map(|m| self.resolve_target_title(m))
                        .unwrap_or_default();

                    let status_text = if grid.learn_mode() && grid.learn_target() == Some(id) {
                        "learning".to_string()
                    } else if let Some(name) = &cell.source_name {
                        name.clone()
                    } else if cell.is_bound() {
                        "any source".to_string()
                    } else {
                        "unbound".to_string()
                    };

                    RemotePad {
                        id,
                        title: format!("Pad {}", id + 1),
                        trigger_label: cell.trigger.map(|t| t.to_string()).unwrap_or_default(),
                        trigger_style,
                        target_title,
                        has_mapping: cell.mapping.is_some(),
                        status_text,
                        normalized_value: match trigger_style {
                            TriggerStyle::Continuous => Some(cell.fill),
                            _ => None,
                        },
                    }
                })
                .collect()
        };

        RemoteSnapshot {
            app_name: app_name.to_string(),
            generated_at: Utc::now().timestamp_millis(),
            server_instance_id: Some(self.instance_id.clone()),
            server_started_at: Some(self.started_at_ms),
            scene_name: current_scene.as_ref().map(|s| s.name.clone()),
            scenes: if scenes.is_empty() {
                None
            } else {
                Some(scenes.iter().map(|s| s.name.clone()).collect())
            },
            current_scene_index: cache.current_scene_index(),
            recording_active: cache.recording(),
            pads,
        }
    }

    /// Human-readable title for a mapping, resolving scene UUIDs through
    /// the catalog when possible
    fn resolve_target_title(&self, mapping: &ControlMapping) -> String {
        if let Some(uuid) = mapping.target.strip_prefix(TARGET_SCENE_PREFIX) {
            if let Some(scene) = self.bridge.cache().scene_by_uuid(uuid) {
                return format!("Scene {}", scene.name);
            }
        }
        mapping.title()
    }

    /// Volume position of an input for display purposes
    pub fn volume_position(&self, input: &str) -> Option<f32> {
        self.bridge
            .cache()
            .volume_mul(input)
            .map(volume::mul_to_position)
    }
}
