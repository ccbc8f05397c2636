//! Grid binding persistence: versioned JSON snapshots
//!
//! The full set of (trigger, source id, source name, mapping) tuples for
//! all cells round-trips through a serializable form. Entries whose
//! mappings reference a superseded target-identifier scheme are dropped on
//! load rather than silently misapplied; the caller surfaces the drop once
//! and re-saves the cleaned state immediately.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use super::{Grid, GridError, GRID_SIZE};
use crate::midi::Trigger;
use crate::plugins::{is_legacy_target, ControlMapping};

/// One persisted cell entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PadBindingEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_source_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<ControlMapping>,
}

/// Serializable grid binding snapshot, one entry per cell
#[derive(Debug, Serialize, Deserialize)]
pub struct PadBindings {
    /// Snapshot format version
    pub version: String,
    pub entries: Vec<PadBindingEntry>,
}

impl PadBindings {
    /// Current snapshot format version (2.x uses UUID-based scene targets)
    pub const VERSION: &'static str = "2.0.0";

    /// Capture the persistable slice of the grid
    pub fn from_grid(grid: &Grid) -> Self {
        let entries = grid
            .cells()
            .iter()
            .map(|cell| PadBindingEntry {
                trigger: cell.trigger,
                trigger_source_id: cell.source_id,
                trigger_source_name: cell.source_name.clone(),
                mapping: cell.mapping.clone(),
            })
            .collect();

        Self {
            version: Self::VERSION.to_string(),
            entries,
        }
    }

    /// Apply persisted bindings to a grid.
    ///
    /// Mappings using a superseded target scheme are dropped; the count of
    /// dropped mappings is returned so the caller can log once and re-save.
    pub fn load_into_grid(&self, grid: &mut Grid) -> Result<usize, GridError> {
        let mut dropped = 0;

        for (index, entry) in self.entries.iter().take(GRID_SIZE).enumerate() {
            let mapping = match &entry.mapping {
                Some(m) if is_legacy_target(&m.target) => {
                    warn!(
                        "Dropping cell {} mapping '{}': superseded target scheme",
                        index, m.target
                    );
                    dropped += 1;
                    None
                }
                other => other.clone(),
            };

            let cell = grid.cell_mut(index)?;
            cell.trigger = entry.trigger;
            cell.source_id = entry.trigger_source_id;
            cell.source_name = entry.trigger_source_name.clone();
            cell.mapping = mapping;
        }

        Ok(dropped)
    }

    /// Save to a JSON file
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize pad bindings")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write pad bindings to {}", path.display()))?;

        debug!("Pad bindings saved to {}", path.display());
        Ok(())
    }

    /// Load from a JSON file
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read pad bindings from {}", path.display()))?;

        let bindings: PadBindings =
            serde_json::from_str(&json).context("Failed to parse pad bindings JSON")?;

        debug!(
            "Pad bindings loaded (version {}, {} entries)",
            bindings.version,
            bindings.entries.len()
        );

        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::TransportAction;
    use crate::plugins::PluginId;
    use tempfile::tempdir;

    fn make_test_bindings() -> PadBindings {
        let mut grid = Grid::new();
        {
            let cell = grid.cell_mut(0).unwrap();
            cell.trigger = Some(Trigger::Note {
                channel: 0,
                note: 60,
            });
            cell.source_id = Some(3);
            cell.source_name = Some("Launchpad".to_string());
            cell.mapping = Some(ControlMapping::new(PluginId::Obs, "scene:3b6d"));
        }
        {
            let cell = grid.cell_mut(7).unwrap();
            cell.trigger = Some(Trigger::MackieTransport {
                action: TransportAction::Record,
            });
            cell.mapping = Some(ControlMapping::record_toggle());
        }
        PadBindings::from_grid(&grid)
    }

    #[test]
    fn test_round_trip_reproduces_bindings() {
        let bindings = make_test_bindings();
        let json = serde_json::to_string(&bindings).unwrap();
        let parsed: PadBindings = serde_json::from_str(&json).unwrap();

        let mut grid = Grid::new();
        let dropped = parsed.load_into_grid(&mut grid).unwrap();
        assert_eq!(dropped, 0);

        let reserialized = PadBindings::from_grid(&grid);
        assert_eq!(bindings.entries, reserialized.entries);
    }

    #[test]
    fn test_legacy_scene_targets_dropped_on_load() {
        let mut bindings = make_test_bindings();
        bindings.entries[0].mapping =
            Some(ControlMapping::new(PluginId::Obs, "scene-name:Main Camera"));

        let mut grid = Grid::new();
        let dropped = bindings.load_into_grid(&mut grid).unwrap();
        assert_eq!(dropped, 1);

        // Trigger survives; only the stale mapping is gone
        let cell = grid.cell(0).unwrap();
        assert!(cell.trigger.is_some());
        assert!(cell.mapping.is_none());

        // Cell 7 is untouched
        assert!(grid.cell(7).unwrap().mapping.is_some());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bindings.json");

        let bindings = make_test_bindings();
        bindings.save_to_file(&path).await.unwrap();

        let loaded = PadBindings::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.version, PadBindings::VERSION);
        assert_eq!(loaded.entries, bindings.entries);
    }

    #[test]
    fn test_oversized_snapshot_is_truncated_to_grid() {
        let mut bindings = make_test_bindings();
        bindings
            .entries
            .extend(std::iter::repeat(PadBindingEntry::default()).take(10));
        assert!(bindings.entries.len() > GRID_SIZE);

        let mut grid = Grid::new();
        // Must not error on extra trailing entries
        bindings.load_into_grid(&mut grid).unwrap();
    }
}
