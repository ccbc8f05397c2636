//! Byte stream parser: raw MIDI buffers to classified events
//!
//! A single receive buffer may contain several concatenated messages and
//! mid-stream garbage. The parser resynchronizes on the next status byte,
//! consumes the documented number of data bytes per status nibble, and
//! applies Mackie Control reinterpretation when the source name carries a
//! known vendor marker. Parsing is a pure function of (bytes, source name);
//! mode classification is a separate stateful component.

use std::time::Instant;
use tracing::trace;

use super::{format_hex, Event, EventKind, Protocol, RawMessage, TransportAction};

/// Source name markers that enable Mackie Control reinterpretation
const MACKIE_MARKERS: &[&str] = &["mackie", "control universal"];

/// Distinct vendor marker with its own transport note set (standard layer,
/// bottom button row). Checked only when the MCU transport check fails.
const XTOUCH_MINI_MARKER: &str = "x-touch mini";

/// MCU transport notes: 91=rewind 92=ffwd 93=stop 94=play 95=record
const MCU_TRANSPORT_FIRST: u8 = 91;
const MCU_TRANSPORT_LAST: u8 = 95;

/// V-Pot rotation CCs on channel 1 (MCU reserves 16-23 for the 8 encoders)
const VPOT_CC_FIRST: u8 = 16;
const VPOT_CC_LAST: u8 = 23;

/// Highest channel carrying an MCU fader via pitch bend (channels 1-8)
const MACKIE_FADER_LAST_CHANNEL: u8 = 7;

fn transport_from_mcu_note(note: u8) -> Option<TransportAction> {
    match note {
        91 => Some(TransportAction::Rewind),
        92 => Some(TransportAction::FastForward),
        93 => Some(TransportAction::Stop),
        94 => Some(TransportAction::Play),
        95 => Some(TransportAction::Record),
        _ => None,
    }
}

fn transport_from_xtouch_mini_note(note: u8) -> Option<TransportAction> {
    match note {
        8 => Some(TransportAction::Rewind),
        9 => Some(TransportAction::FastForward),
        10 => Some(TransportAction::Stop),
        11 => Some(TransportAction::Play),
        12 => Some(TransportAction::Record),
        _ => None,
    }
}

/// Whether Mackie reinterpretation applies to this source name
fn is_mackie_source(source_name: &str) -> bool {
    let lower = source_name.to_lowercase();
    MACKIE_MARKERS.iter().any(|m| lower.contains(m)) || lower.contains(XTOUCH_MINI_MARKER)
}

fn is_xtouch_mini_source(source_name: &str) -> bool {
    source_name.to_lowercase().contains(XTOUCH_MINI_MARKER)
}

/// Parse a receive buffer into zero or more classified events.
///
/// Stray bytes with the high bit unset are skipped one at a time until a
/// valid status byte is found. Unrecognized status bytes produce an
/// `Unknown` event and advance by a single byte so a malformed stream never
/// swallows a following valid message. A truncated trailing message is
/// dropped (best-effort partial parse).
pub fn parse(bytes: &[u8], source_name: &str, source_id: u32) -> Vec<Event> {
    let mackie = is_mackie_source(source_name);
    let xtouch_mini = is_xtouch_mini_source(source_name);
    let now = Instant::now();

    let mut events = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let status = bytes[i];

        // Resync: advance one byte at a time over mid-stream garbage
        if status < 0x80 {
            i += 1;
            continue;
        }

        let channel = status & 0x0F;
        let kind = match status & 0xF0 {
            0x80 => {
                // Note off: consumed but never an event for this system
                if i + 2 >= bytes.len() {
                    break;
                }
                i += 3;
                continue;
            }
            0x90 => {
                if i + 2 >= bytes.len() {
                    break;
                }
                let note = bytes[i + 1] & 0x7F;
                let velocity = bytes[i + 2] & 0x7F;
                i += 3;

                // Velocity 0 is note-off by convention
                if velocity == 0 {
                    continue;
                }

                resolve_note_on(mackie, xtouch_mini, channel, note, velocity)
            }
            0xB0 => {
                if i + 2 >= bytes.len() {
                    break;
                }
                let controller = bytes[i + 1] & 0x7F;
                let value = bytes[i + 2] & 0x7F;
                i += 3;

                if mackie
                    && channel == 0
                    && (VPOT_CC_FIRST..=VPOT_CC_LAST).contains(&controller)
                {
                    EventKind::MackieVPot {
                        index: controller - VPOT_CC_FIRST,
                        value,
                    }
                } else {
                    EventKind::ControlChange {
                        channel,
                        controller,
                        value,
                    }
                }
            }
            0xC0 => {
                if i + 1 >= bytes.len() {
                    break;
                }
                let program = bytes[i + 1] & 0x7F;
                i += 2;
                EventKind::ProgramChange { channel, program }
            }
            0xE0 => {
                if i + 2 >= bytes.len() {
                    break;
                }
                let lsb = (bytes[i + 1] & 0x7F) as u16;
                let msb = (bytes[i + 2] & 0x7F) as u16;
                let value = (msb << 7) | lsb;
                i += 3;

                if mackie && channel <= MACKIE_FADER_LAST_CHANNEL {
                    EventKind::MackieFader {
                        index: channel,
                        value,
                    }
                } else {
                    EventKind::PitchBend { channel, value }
                }
            }
            _ => {
                // Unrecognized status: advance by 1, not 3, so we never
                // over-consume a following valid message
                i += 1;
                events.push(make_event(
                    now,
                    source_name,
                    source_id,
                    EventKind::Unknown { status },
                    RawMessage::new(status, 0, 0),
                ));
                continue;
            }
        };

        let raw = raw_for_kind(&kind, status, bytes, i);
        events.push(make_event(now, source_name, source_id, kind, raw));
    }

    if !events.is_empty() {
        trace!(
            "parsed {} event(s) from {} [{}]",
            events.len(),
            source_name,
            format_hex(bytes)
        );
    }

    events
}

/// Resolve a note-on under the active interpretation.
///
/// MCU transport notes are checked first; the vendor-specific set applies
/// only when the MCU check fails and the source name matches that vendor.
fn resolve_note_on(
    mackie: bool,
    xtouch_mini: bool,
    channel: u8,
    note: u8,
    velocity: u8,
) -> EventKind {
    if mackie && channel == 0 {
        if (MCU_TRANSPORT_FIRST..=MCU_TRANSPORT_LAST).contains(&note) {
            if let Some(action) = transport_from_mcu_note(note) {
                return EventKind::MackieTransport { action };
            }
        }
        if xtouch_mini {
            if let Some(action) = transport_from_xtouch_mini_note(note) {
                return EventKind::MackieTransport { action };
            }
        }
    }

    EventKind::NoteOn {
        channel,
        note,
        velocity,
    }
}

/// Reconstruct the originating RawMessage for an event whose data bytes end
/// at index `end` of the buffer.
fn raw_for_kind(kind: &EventKind, status: u8, bytes: &[u8], end: usize) -> RawMessage {
    match kind {
        EventKind::ProgramChange { .. } => RawMessage::new(status, bytes[end - 1] & 0x7F, 0),
        _ => RawMessage::new(status, bytes[end - 2] & 0x7F, bytes[end - 1] & 0x7F),
    }
}

fn make_event(
    timestamp: Instant,
    source_name: &str,
    source_id: u32,
    kind: EventKind,
    raw: RawMessage,
) -> Event {
    let protocol = if kind.is_mackie() {
        Protocol::MackieControl
    } else {
        Protocol::Raw
    };

    Event {
        timestamp,
        source_name: source_name.to_string(),
        source_id,
        protocol,
        kind,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GENERIC: &str = "Generic Keyboard";
    const MACKIE: &str = "Mackie Control";

    #[test]
    fn test_note_on_round_trip() {
        let events = parse(&[0x90, 0x3C, 0x40], GENERIC, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            EventKind::NoteOn {
                channel: 0,
                note: 60,
                velocity: 64
            }
        );
        assert_eq!(events[0].raw, RawMessage::new(0x90, 0x3C, 0x40));
        assert_eq!(events[0].protocol, Protocol::Raw);
    }

    #[test]
    fn test_every_status_nibble_round_trips() {
        let cases: Vec<(Vec<u8>, EventKind)> = vec![
            (
                vec![0x91, 10, 100],
                EventKind::NoteOn {
                    channel: 1,
                    note: 10,
                    velocity: 100,
                },
            ),
            (
                vec![0xB2, 7, 99],
                EventKind::ControlChange {
                    channel: 2,
                    controller: 7,
                    value: 99,
                },
            ),
            (
                vec![0xC3, 5],
                EventKind::ProgramChange {
                    channel: 3,
                    program: 5,
                },
            ),
            (
                vec![0xE4, 0x00, 0x40],
                EventKind::PitchBend {
                    channel: 4,
                    value: 8192,
                },
            ),
        ];

        for (bytes, expected) in cases {
            let events = parse(&bytes, GENERIC, 1);
            assert_eq!(events.len(), 1, "bytes {:?}", bytes);
            assert_eq!(events[0].kind, expected);
            assert_eq!(events[0].raw.encode(), bytes);
        }
    }

    #[test]
    fn test_note_off_suppression() {
        assert!(parse(&[0x80, 60, 100], GENERIC, 1).is_empty());
        assert!(parse(&[0x90, 60, 0], GENERIC, 1).is_empty());
    }

    #[test]
    fn test_garbage_resynchronization() {
        let events = parse(&[0x00, 0x00, 0x90, 0x3C, 0x40], GENERIC, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            EventKind::NoteOn {
                channel: 0,
                note: 60,
                velocity: 64
            }
        );
    }

    #[test]
    fn test_multiple_concatenated_messages() {
        let events = parse(&[0x90, 60, 100, 0xB0, 16, 1, 0xC0, 7], GENERIC, 1);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_unknown_status_advances_one_byte() {
        // 0xF8 is unrecognized; the note message right behind it must survive
        let events = parse(&[0xF8, 0x90, 60, 100], GENERIC, 1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Unknown { status: 0xF8 });
        assert_eq!(
            events[1].kind,
            EventKind::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_truncated_trailing_message_dropped() {
        let events = parse(&[0x90, 60, 100, 0xB0, 16], GENERIC, 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_mackie_reinterpretation_depends_on_source_name() {
        let bytes = [0x90, 91, 0x7F];

        let mackie = parse(&bytes, MACKIE, 1);
        assert_eq!(
            mackie[0].kind,
            EventKind::MackieTransport {
                action: TransportAction::Rewind
            }
        );
        assert_eq!(mackie[0].protocol, Protocol::MackieControl);

        let generic = parse(&bytes, GENERIC, 1);
        assert_eq!(
            generic[0].kind,
            EventKind::NoteOn {
                channel: 0,
                note: 91,
                velocity: 127
            }
        );
        assert_eq!(generic[0].protocol, Protocol::Raw);
    }

    #[test]
    fn test_mackie_marker_is_case_insensitive_substring() {
        let events = parse(&[0x90, 94, 0x7F], "X-TOUCH Control Universal Pro", 1);
        assert_eq!(
            events[0].kind,
            EventKind::MackieTransport {
                action: TransportAction::Play
            }
        );
    }

    #[test]
    fn test_transport_only_on_channel_zero() {
        // Same note on channel 2 stays a plain note even for Mackie sources
        let events = parse(&[0x91, 93, 0x7F], MACKIE, 1);
        assert_eq!(
            events[0].kind,
            EventKind::NoteOn {
                channel: 1,
                note: 93,
                velocity: 127
            }
        );
    }

    #[test]
    fn test_xtouch_mini_secondary_transport_set() {
        // Note 11 is play on the X-Touch Mini layer but a plain note on MCU
        let mini = parse(&[0x90, 11, 0x7F], "X-Touch Mini", 1);
        assert_eq!(
            mini[0].kind,
            EventKind::MackieTransport {
                action: TransportAction::Play
            }
        );

        let mcu = parse(&[0x90, 11, 0x7F], MACKIE, 1);
        assert_eq!(
            mcu[0].kind,
            EventKind::NoteOn {
                channel: 0,
                note: 11,
                velocity: 127
            }
        );
    }

    #[test]
    fn test_vpot_range_maps_to_indexed_encoders() {
        let events = parse(&[0xB0, 16, 1, 0xB0, 23, 65], MACKIE, 1);
        assert_eq!(
            events[0].kind,
            EventKind::MackieVPot { index: 0, value: 1 }
        );
        assert_eq!(
            events[1].kind,
            EventKind::MackieVPot {
                index: 7,
                value: 65
            }
        );

        // CC outside the V-Pot range stays generic even on a Mackie source
        let generic_cc = parse(&[0xB0, 70, 42], MACKIE, 1);
        assert_eq!(
            generic_cc[0].kind,
            EventKind::ControlChange {
                channel: 0,
                controller: 70,
                value: 42
            }
        );
    }

    #[test]
    fn test_mackie_fader_channels() {
        let events = parse(&[0xE0, 0x00, 0x40, 0xE7, 0x7F, 0x7F], MACKIE, 1);
        assert_eq!(
            events[0].kind,
            EventKind::MackieFader {
                index: 0,
                value: 8192
            }
        );
        assert_eq!(
            events[1].kind,
            EventKind::MackieFader {
                index: 7,
                value: 16383
            }
        );

        // Channel 9+ pitch bend is not a Mackie fader
        let events = parse(&[0xE8, 0x00, 0x40], MACKIE, 1);
        assert_eq!(
            events[0].kind,
            EventKind::PitchBend {
                channel: 8,
                value: 8192
            }
        );
    }

    proptest! {
        /// The parser never panics and never loops on arbitrary garbage.
        #[test]
        fn parse_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = parse(&bytes, GENERIC, 1);
            let _ = parse(&bytes, MACKIE, 1);
        }

        /// Well-formed note-on messages always round-trip their raw bytes.
        #[test]
        fn note_on_raw_round_trip(note in 0u8..128, vel in 1u8..128, ch in 0u8..16) {
            let bytes = [0x90 | ch, note, vel];
            let events = parse(&bytes, GENERIC, 1);
            // Mackie-marker-free source: always exactly one plain note event
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(events[0].raw.encode(), bytes.to_vec());
        }
    }
}
