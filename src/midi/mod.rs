//! MIDI message model: raw bytes, trigger identities, and classified events
//!
//! A [`RawMessage`] is what the wire gives us. A [`Trigger`] identifies a
//! physical control independent of its value and is the stable key used for
//! grid mapping lookups. An [`Event`] is one fully classified occurrence,
//! carrying the trigger kind plus its instantaneous value.

pub mod classifier;
pub mod parser;
pub mod sources;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A single 3-byte MIDI message as delivered by the transport layer.
///
/// Program change only uses two bytes on the wire; `data2` is zero there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl RawMessage {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    /// Encode back to wire bytes (2 bytes for program change, 3 otherwise)
    pub fn encode(&self) -> Vec<u8> {
        if self.status & 0xF0 == 0xC0 {
            vec![self.status, self.data1]
        } else {
            vec![self.status, self.data1, self.data2]
        }
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X}",
            self.status, self.data1, self.data2
        )
    }
}

/// Mackie Control transport actions (reserved note range 91-95, channel 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportAction {
    Rewind,
    FastForward,
    Stop,
    Play,
    Record,
}

impl TransportAction {
    pub fn label(&self) -> &'static str {
        match self {
            TransportAction::Rewind => "Rewind",
            TransportAction::FastForward => "Fast Forward",
            TransportAction::Stop => "Stop",
            TransportAction::Play => "Play",
            TransportAction::Record => "Record",
        }
    }
}

/// Identity of a physical control, independent of its current value.
///
/// Serializes as a kind tag plus only the fields relevant to that kind, so
/// persisted bindings stay readable and minimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Note { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8 },
    MackieTransport { action: TransportAction },
    MackieVPot { index: u8 },
    MackieFader { index: u8 },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Note { channel, note } => write!(f, "Note ch:{} n:{}", channel + 1, note),
            Trigger::ControlChange {
                channel,
                controller,
            } => write!(f, "CC ch:{} cc:{}", channel + 1, controller),
            Trigger::ProgramChange { channel, program } => {
                write!(f, "PC ch:{} p:{}", channel + 1, program)
            }
            Trigger::PitchBend { channel } => write!(f, "PitchBend ch:{}", channel + 1),
            Trigger::MackieTransport { action } => write!(f, "MCU {}", action.label()),
            Trigger::MackieVPot { index } => write!(f, "V-Pot {}", index + 1),
            Trigger::MackieFader { index } => write!(f, "Fader {}", index + 1),
        }
    }
}

/// Which protocol interpretation produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Raw,
    MackieControl,
}

/// A classified event kind: the trigger type plus its instantaneous value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    /// 14-bit value, 0-16383
    PitchBend {
        channel: u8,
        value: u16,
    },
    MackieTransport {
        action: TransportAction,
    },
    /// Rotary encoder motion, value 0-127 (encoding resolved by the classifier)
    MackieVPot {
        index: u8,
        value: u8,
    },
    /// Motorized fader position, 14-bit
    MackieFader {
        index: u8,
        value: u16,
    },
    /// Unrecognized status byte, kept for diagnostics
    Unknown {
        status: u8,
    },
}

impl EventKind {
    /// The trigger identity for this kind, if it has one
    pub fn trigger(&self) -> Option<Trigger> {
        match *self {
            EventKind::NoteOn { channel, note, .. } => Some(Trigger::Note { channel, note }),
            EventKind::ControlChange {
                channel, controller, ..
            } => Some(Trigger::ControlChange {
                channel,
                controller,
            }),
            EventKind::ProgramChange { channel, program } => {
                Some(Trigger::ProgramChange { channel, program })
            }
            EventKind::PitchBend { channel, .. } => Some(Trigger::PitchBend { channel }),
            EventKind::MackieTransport { action } => Some(Trigger::MackieTransport { action }),
            EventKind::MackieVPot { index, .. } => Some(Trigger::MackieVPot { index }),
            EventKind::MackieFader { index, .. } => Some(Trigger::MackieFader { index }),
            EventKind::Unknown { .. } => None,
        }
    }

    /// Discrete (edge-triggered) kinds are debounced; continuous kinds are not
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            EventKind::NoteOn { .. }
                | EventKind::ProgramChange { .. }
                | EventKind::MackieTransport { .. }
        )
    }

    /// Whether this kind came from the Mackie reinterpretation layer
    pub fn is_mackie(&self) -> bool {
        matches!(
            self,
            EventKind::MackieTransport { .. }
                | EventKind::MackieVPot { .. }
                | EventKind::MackieFader { .. }
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EventKind::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity),
            EventKind::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "CC ch:{} cc:{} v:{}", channel + 1, controller, value),
            EventKind::ProgramChange { channel, program } => {
                write!(f, "PC ch:{} p:{}", channel + 1, program)
            }
            EventKind::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            EventKind::MackieTransport { action } => write!(f, "MCU {}", action.label()),
            EventKind::MackieVPot { index, value } => {
                write!(f, "V-Pot {} v:{}", index + 1, value)
            }
            EventKind::MackieFader { index, value } => {
                write!(f, "Fader {} v:{}", index + 1, value)
            }
            EventKind::Unknown { status } => write!(f, "Unknown 0x{:02X}", status),
        }
    }
}

/// A fully classified MIDI occurrence from one source.
///
/// Created once per parsed message (or per synthesized remote command) and
/// consumed immediately; never mutated after creation.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: Instant,
    pub source_name: String,
    pub source_id: u32,
    pub protocol: Protocol,
    pub kind: EventKind,
    pub raw: RawMessage,
}

impl Event {
    /// The trigger identity, if the kind has one
    pub fn trigger(&self) -> Option<Trigger> {
        self.kind.trigger()
    }
}

/// Format MIDI bytes as a hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
