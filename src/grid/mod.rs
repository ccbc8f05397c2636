//! The pad grid: trigger bindings, learn mode, and cell state
//!
//! A fixed collection of 16 user-facing control slots. Each cell may hold a
//! trigger identity scoped to an originating source, a control mapping, the
//! last event that hit it, and transient presentation state. Cells are
//! created at startup and cleared in place, never destroyed. All access
//! goes through bounds-checked accessors returning a result; there is no
//! silent no-op on an out-of-range index.

pub mod persistence;

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::midi::classifier::ControlMode;
use crate::midi::{Event, TransportAction, Trigger};
use crate::plugins::ControlMapping;

/// Number of pad cells
pub const GRID_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("cell index {index} out of range (grid has {size} cells)")]
    CellOutOfRange { index: usize, size: usize },
}

/// One user-facing control slot
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    /// Bound trigger identity; `None` while unbound
    pub trigger: Option<Trigger>,
    /// Source scoping: numeric identity of the source the trigger was
    /// learned from. Both `None` means wildcard (matches any source).
    pub source_id: Option<u32>,
    pub source_name: Option<String>,
    /// Last event routed to this cell (preview during learn, live after)
    pub last_event: Option<Event>,
    /// Logical action binding
    pub mapping: Option<ControlMapping>,

    // Presentation state, updated by the pipeline for realtime feedback
    /// Normalized fill level for absolute controls
    pub fill: f32,
    /// Relative-motion phase accumulator (presentation only)
    pub phase: f32,
    /// Last relative direction: -1, 0, or 1
    pub direction: i8,
    /// Display copy of the classifier's resolved mode
    pub mode: ControlMode,
    /// Bumped on every binding change so observers can diff cheaply
    pub change_nonce: u64,
    pub last_activity: Option<Instant>,
}

impl GridCell {
    pub fn is_bound(&self) -> bool {
        self.trigger.is_some()
    }

    /// Whether an incoming (trigger, source) routes to this cell.
    ///
    /// Matches when the stored source id equals the event's, or the stored
    /// name equals the event's case-insensitively, or the cell stores no
    /// source identity at all (wildcard).
    pub fn matches(&self, trigger: Trigger, source_id: u32, source_name: &str) -> bool {
        if self.trigger != Some(trigger) {
            return false;
        }

        match (&self.source_id, &self.source_name) {
            (None, None) => true,
            (Some(id), _) if *id == source_id => true,
            (_, Some(name)) => name.eq_ignore_ascii_case(source_name),
            _ => false,
        }
    }
}

/// The fixed-size pad grid plus global learn-mode state
pub struct Grid {
    cells: Vec<GridCell>,
    learn_mode: bool,
    learn_target: Option<usize>,
    nonce_counter: u64,
}

impl Grid {
    pub fn new() -> Self {
        Self {
            cells: vec![GridCell::default(); GRID_SIZE],
            learn_mode: false,
            learn_target: None,
            nonce_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> Result<&GridCell, GridError> {
        self.cells.get(index).ok_or(GridError::CellOutOfRange {
            index,
            size: GRID_SIZE,
        })
    }

    pub fn cell_mut(&mut self, index: usize) -> Result<&mut GridCell, GridError> {
        let size = self.cells.len();
        self.cells
            .get_mut(index)
            .ok_or(GridError::CellOutOfRange { index, size })
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    // ------------------------------------------------------------------
    // Learn mode
    // ------------------------------------------------------------------

    pub fn learn_mode(&self) -> bool {
        self.learn_mode
    }

    pub fn set_learn_mode(&mut self, enabled: bool) {
        if self.learn_mode != enabled {
            info!(
                "{} learn mode",
                if enabled { "🎓 Entering" } else { "Leaving" }
            );
        }
        self.learn_mode = enabled;
        if !enabled {
            self.learn_target = None;
        }
    }

    pub fn learn_target(&self) -> Option<usize> {
        self.learn_target
    }

    /// Select the cell the next incoming trigger binds to
    pub fn set_learn_target(&mut self, index: usize) -> Result<(), GridError> {
        self.cell(index)?;
        self.learn_target = Some(index);
        Ok(())
    }

    /// Whether an event arriving now should be captured rather than
    /// dispatched: learn mode is globally on and a target cell is selected.
    pub fn is_capturing(&self) -> bool {
        self.learn_mode && self.learn_target.is_some()
    }

    /// Bind the learn-target cell to the event's trigger.
    ///
    /// Overwrites any existing trigger and source scoping but preserves an
    /// existing mapping; `default_mapping` is only installed when the cell
    /// has none yet. Returns the bound cell index.
    pub fn capture(
        &mut self,
        event: &Event,
        default_mapping: Option<ControlMapping>,
    ) -> Result<Option<usize>, GridError> {
        let Some(index) = self.learn_target else {
            return Ok(None);
        };
        let Some(trigger) = event.trigger() else {
            return Ok(None);
        };

        let nonce = self.next_nonce();
        let cell = self.cell_mut(index)?;

        cell.trigger = Some(trigger);
        cell.source_id = Some(event.source_id);
        cell.source_name = Some(event.source_name.clone());
        cell.last_event = Some(event.clone());
        cell.change_nonce = nonce;

        if cell.mapping.is_none() {
            cell.mapping = default_mapping;
        }

        info!(
            "🎓 Cell {} learned {} from '{}'",
            index, trigger, event.source_name
        );

        // One capture per target selection
        self.learn_target = None;
        Ok(Some(index))
    }

    // ------------------------------------------------------------------
    // Binding management
    // ------------------------------------------------------------------

    /// Assign or replace a cell's mapping
    pub fn assign_mapping(&mut self, index: usize, mapping: ControlMapping) -> Result<(), GridError> {
        let nonce = self.next_nonce();
        let cell = self.cell_mut(index)?;
        cell.mapping = Some(mapping);
        cell.change_nonce = nonce;
        Ok(())
    }

    /// Explicit removal: clears trigger, source identity, mapping, and last
    /// event together. Partial clears are not a valid state.
    pub fn clear_cell(&mut self, index: usize) -> Result<(), GridError> {
        let nonce = self.next_nonce();
        let cell = self.cell_mut(index)?;
        *cell = GridCell {
            change_nonce: nonce,
            ..GridCell::default()
        };
        debug!("Cell {} cleared", index);
        Ok(())
    }

    /// Indices of every cell the (trigger, source) routes to
    pub fn matching_cells(&self, trigger: Trigger, source_id: u32, source_name: &str) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.matches(trigger, source_id, source_name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Synthesize the default mapping for a freshly learned trigger: a
    /// Mackie Record transport defaults to toggling recording; anything
    /// else gets the caller-provided first available target.
    pub fn default_mapping_for(
        trigger: Trigger,
        first_available: Option<ControlMapping>,
    ) -> Option<ControlMapping> {
        match trigger {
            Trigger::MackieTransport {
                action: TransportAction::Record,
            } => Some(ControlMapping::record_toggle()),
            _ => first_available,
        }
    }

    fn next_nonce(&mut self) -> u64 {
        self.nonce_counter += 1;
        self.nonce_counter
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{EventKind, Protocol, RawMessage};
    use crate::plugins::PluginId;

    fn make_test_event(kind: EventKind, source_id: u32, source_name: &str) -> Event {
        Event {
            timestamp: Instant::now(),
            source_name: source_name.to_string(),
            source_id,
            protocol: if kind.is_mackie() {
                Protocol::MackieControl
            } else {
                Protocol::Raw
            },
            kind,
            raw: RawMessage::new(0, 0, 0),
        }
    }

    fn note_on(note: u8, source_id: u32, source_name: &str) -> Event {
        make_test_event(
            EventKind::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
            source_id,
            source_name,
        )
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let mut grid = Grid::new();
        assert_eq!(
            grid.cell(16).unwrap_err(),
            GridError::CellOutOfRange {
                index: 16,
                size: 16
            }
        );
        assert!(grid.set_learn_target(99).is_err());
        assert!(grid.clear_cell(42).is_err());
    }

    #[test]
    fn test_learn_capture_binds_trigger_and_scoping() {
        let mut grid = Grid::new();
        grid.set_learn_mode(true);
        grid.set_learn_target(3).unwrap();

        let event = note_on(60, 7, "Launchpad");
        let bound = grid
            .capture(&event, Some(ControlMapping::new(PluginId::Obs, "scene:a1")))
            .unwrap();
        assert_eq!(bound, Some(3));

        let cell = grid.cell(3).unwrap();
        assert_eq!(
            cell.trigger,
            Some(Trigger::Note {
                channel: 0,
                note: 60
            })
        );
        assert_eq!(cell.source_id, Some(7));
        assert_eq!(cell.source_name.as_deref(), Some("Launchpad"));
        assert!(cell.mapping.is_some());
        assert!(cell.last_event.is_some());

        // Target is consumed by the capture
        assert_eq!(grid.learn_target(), None);
    }

    #[test]
    fn test_relearn_overwrites_trigger_but_preserves_mapping() {
        let mut grid = Grid::new();
        grid.set_learn_mode(true);
        grid.set_learn_target(0).unwrap();
        grid.capture(
            &note_on(60, 1, "A"),
            Some(ControlMapping::new(PluginId::Obs, "scene:a1")),
        )
        .unwrap();

        grid.set_learn_target(0).unwrap();
        grid.capture(
            &note_on(61, 2, "B"),
            Some(ControlMapping::new(PluginId::Obs, "scene:zz")),
        )
        .unwrap();

        let cell = grid.cell(0).unwrap();
        assert_eq!(
            cell.trigger,
            Some(Trigger::Note {
                channel: 0,
                note: 61
            })
        );
        assert_eq!(cell.source_id, Some(2));
        // Existing mapping survives the re-learn
        assert_eq!(
            cell.mapping,
            Some(ControlMapping::new(PluginId::Obs, "scene:a1"))
        );
    }

    #[test]
    fn test_clear_cell_wipes_everything_together() {
        let mut grid = Grid::new();
        grid.set_learn_mode(true);
        grid.set_learn_target(5).unwrap();
        grid.capture(
            &note_on(62, 1, "A"),
            Some(ControlMapping::new(PluginId::Obs, "scene:a1")),
        )
        .unwrap();

        grid.clear_cell(5).unwrap();
        let cell = grid.cell(5).unwrap();
        assert!(cell.trigger.is_none());
        assert!(cell.source_id.is_none());
        assert!(cell.source_name.is_none());
        assert!(cell.mapping.is_none());
        assert!(cell.last_event.is_none());
    }

    #[test]
    fn test_source_scoped_matching() {
        let mut grid = Grid::new();
        grid.set_learn_mode(true);
        grid.set_learn_target(0).unwrap();
        grid.capture(&note_on(60, 7, "Launchpad"), None).unwrap();

        let trigger = Trigger::Note {
            channel: 0,
            note: 60,
        };

        // Same source id matches
        assert_eq!(grid.matching_cells(trigger, 7, "whatever"), vec![0]);
        // Same name (case-insensitive) matches even with a new id
        assert_eq!(grid.matching_cells(trigger, 99, "LAUNCHPAD"), vec![0]);
        // Different id and different name: no cross-fire
        assert!(grid.matching_cells(trigger, 99, "Other Device").is_empty());
    }

    #[test]
    fn test_wildcard_source_matches_anything() {
        let mut grid = Grid::new();
        let cell = grid.cell_mut(2).unwrap();
        cell.trigger = Some(Trigger::ControlChange {
            channel: 0,
            controller: 7,
        });
        // No source identity stored: wildcard

        let trigger = Trigger::ControlChange {
            channel: 0,
            controller: 7,
        };
        assert_eq!(grid.matching_cells(trigger, 1, "Anything"), vec![2]);
        assert_eq!(grid.matching_cells(trigger, 2, "Else"), vec![2]);
    }

    #[test]
    fn test_default_mapping_special_cases_mackie_record() {
        let record = Trigger::MackieTransport {
            action: TransportAction::Record,
        };
        assert_eq!(
            Grid::default_mapping_for(record, None),
            Some(ControlMapping::record_toggle())
        );

        let note = Trigger::Note {
            channel: 0,
            note: 60,
        };
        let first = ControlMapping::new(PluginId::Obs, "scene:a1");
        assert_eq!(
            Grid::default_mapping_for(note, Some(first.clone())),
            Some(first)
        );
    }

    #[test]
    fn test_capture_without_target_is_a_no_op() {
        let mut grid = Grid::new();
        grid.set_learn_mode(true);
        let bound = grid.capture(&note_on(60, 1, "A"), None).unwrap();
        assert_eq!(bound, None);
    }
}
