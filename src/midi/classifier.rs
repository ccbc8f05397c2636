//! Control-mode classifier: absolute position vs. relative delta
//!
//! Cheap rotary encoders and endless knobs send control-change values that
//! are indistinguishable from absolute faders on a per-message basis. This
//! component accumulates evidence per (source, channel, controller) key and
//! resolves each stream to a sticky mode once enough consistent votes have
//! been seen. Before resolution the per-value heuristic decides the current
//! frame's treatment without committing the key.
//!
//! Two relative encodings exist in the wild and are NOT interchangeable:
//!
//! - [`signed_bit_delta`]: two's-complement-like, rest value 64. Canonical
//!   for generic CC streams (dispatch and presentation).
//! - [`mackie_delta`]: 6-bit sign-magnitude as sent by MCU V-Pots. Canonical
//!   for Mackie V-Pot dispatch and volume deltas. The presentation phase
//!   accumulator uses the signed-bit form for V-Pots too, which is safe
//!   because phase is presentation-only.

use std::collections::HashMap;
use tracing::debug;

/// Votes required before a key's mode resolves
const RESOLVE_THRESHOLD: u32 = 3;

/// Resolved interpretation of a continuous controller stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Unknown,
    Absolute,
    Relative,
}

/// Classifier key: one evidence state per physical controller per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlKey {
    pub source_id: u32,
    pub channel: u8,
    pub controller: u8,
}

/// Evidence counters for one key
#[derive(Debug, Clone, Copy, Default)]
struct Evidence {
    relative: u32,
    absolute: u32,
    mode: ControlMode,
}

impl Evidence {
    fn vote(&mut self, looks_relative: bool) {
        // Sticky: once resolved, further votes never flip the mode
        if self.mode != ControlMode::Unknown {
            return;
        }

        if looks_relative {
            self.relative += 1;
        } else {
            self.absolute += 1;
        }

        if self.relative >= RESOLVE_THRESHOLD && self.relative > self.absolute {
            self.mode = ControlMode::Relative;
        } else if self.absolute >= RESOLVE_THRESHOLD && self.absolute >= self.relative {
            self.mode = ControlMode::Absolute;
        }
    }
}

/// Heuristic: does a single CC value look like a relative delta?
///
/// 64 is the rest value in both relative encodings; small excursions from 0
/// or 127 look like two's-complement deltas; the near-64 band covers
/// signed-bit encoders that idle slightly off center.
pub fn looks_relative(value: u8) -> bool {
    value == 64 || (1..=8).contains(&value) || (120..=127).contains(&value) || (56..=72).contains(&value)
}

/// Signed-bit relative delta: 64 is rest, above 64 is positive, below is
/// negative magnitude. Canonical for generic CC controllers.
pub fn signed_bit_delta(value: u8) -> i32 {
    if value == 64 {
        0
    } else if value > 64 {
        i32::from(value) - 64
    } else {
        -i32::from(value)
    }
}

/// Mackie 6-bit sign-magnitude delta as sent by MCU V-Pots: 0x01-0x3F
/// clockwise, 0x41-0x7F counter-clockwise. Canonical for V-Pot dispatch.
pub fn mackie_delta(value: u8) -> i32 {
    if value <= 0x3F {
        i32::from(value)
    } else {
        -i32::from(value & 0x3F)
    }
}

/// Advance a presentation phase accumulator by one delta.
///
/// The phase only ever grows (direction is tracked separately by the cell),
/// so identical delta sequences always produce identical phase sequences.
pub fn advance_phase(phase: f32, delta: i32) -> f32 {
    let magnitude = delta.unsigned_abs().clamp(1, 8) as f32;
    phase + magnitude / 10.0
}

/// Per-key evidence store. Keys are created lazily on first observation and
/// cleared on source disconnect or settings reset.
#[derive(Debug, Default)]
pub struct ModeClassifier {
    states: HashMap<ControlKey, Evidence>,
}

impl ModeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one value for a key and return the treatment for this frame.
    ///
    /// Resolved keys return their sticky mode. Unresolved keys return the
    /// transient per-value heuristic result without committing it.
    pub fn observe(&mut self, key: ControlKey, value: u8) -> ControlMode {
        let entry = self.states.entry(key).or_default();
        let frame_looks_relative = looks_relative(value);
        entry.vote(frame_looks_relative);

        match entry.mode {
            ControlMode::Unknown => {
                if frame_looks_relative {
                    ControlMode::Relative
                } else {
                    ControlMode::Absolute
                }
            }
            resolved => resolved,
        }
    }

    /// The resolved mode for a key, without voting
    pub fn mode(&self, key: &ControlKey) -> ControlMode {
        self.states.get(key).map(|e| e.mode).unwrap_or_default()
    }

    /// Invalidate every key for one source (disconnect/reconnect)
    pub fn reset_source(&mut self, source_id: u32) {
        let before = self.states.len();
        self.states.retain(|k, _| k.source_id != source_id);
        if self.states.len() != before {
            debug!(
                "classifier: cleared {} key(s) for source {}",
                before - self.states.len(),
                source_id
            );
        }
    }

    /// Invalidate everything (settings/connection reset)
    pub fn reset_all(&mut self) {
        self.states.clear();
    }
}
