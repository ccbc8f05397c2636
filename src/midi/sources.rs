//! MIDI source connections
//!
//! Thin adapter over midir: enumerates input ports, connects to them, and
//! hands raw byte deliveries off to the pipeline channel. Hardware
//! callbacks run on midir's delivery thread; everything stateful happens on
//! the router task that drains the channel, preserving arrival order.

use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Message from a source delivery callback to the pipeline
#[derive(Debug, Clone)]
pub enum SourceMessage {
    /// Raw bytes received from a connected source
    Data {
        source_id: u32,
        source_name: String,
        bytes: Vec<u8>,
    },
    /// A source connection was torn down; per-source state must be reset
    Disconnected { source_id: u32 },
}

struct SourceConnection {
    id: u32,
    name: String,
    // Held only to keep the midir connection alive
    _conn: MidiInputConnection<()>,
}

/// Open MIDI input connections feeding the pipeline channel
pub struct MidiSources {
    connections: Vec<SourceConnection>,
    event_tx: mpsc::Sender<SourceMessage>,
    next_id: u32,
}

impl MidiSources {
    pub fn new(event_tx: mpsc::Sender<SourceMessage>) -> Self {
        Self {
            connections: Vec::new(),
            event_tx,
            next_id: 1,
        }
    }

    /// List available MIDI input port names
    pub fn list_input_ports() -> Result<Vec<String>> {
        let midi_in = MidiInput::new("PadGrid-GW-Scanner").context("Failed to create MIDI input")?;

        let mut port_names = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                port_names.push(name);
            }
        }

        Ok(port_names)
    }

    /// Connect to every input port whose name matches one of the configured
    /// patterns (case-insensitive substring). An empty pattern list connects
    /// to all ports.
    pub fn connect_matching(&mut self, patterns: &[String]) -> Result<usize> {
        let midi_in = MidiInput::new("PadGrid-GW-Input").context("Failed to create MIDI input")?;

        let mut connected = 0;
        for port in midi_in.ports() {
            let name = match midi_in.port_name(&port) {
                Ok(name) => name,
                Err(_) => continue,
            };

            let matches = patterns.is_empty()
                || patterns
                    .iter()
                    .any(|p| name.to_lowercase().contains(&p.to_lowercase()));
            if !matches {
                continue;
            }

            // midir consumes the MidiInput per connection
            let input = MidiInput::new("PadGrid-GW-Input")
                .context("Failed to create MIDI input for connection")?;
            let source_id = self.next_id;
            let source_name = name.clone();
            let event_tx = self.event_tx.clone();

            let conn = match input.connect(
                &port,
                "PadGrid-GW",
                move |_timestamp, bytes, _| {
                    // Never block or panic inside the hardware callback
                    let _ = event_tx.try_send(SourceMessage::Data {
                        source_id,
                        source_name: source_name.clone(),
                        bytes: bytes.to_vec(),
                    });
                },
                (),
            ) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to connect input port '{}': {}", name, e);
                    continue;
                }
            };

            info!("🎹 Connected MIDI source #{}: {}", source_id, name);
            self.connections.push(SourceConnection {
                id: source_id,
                name,
                _conn: conn,
            });
            self.next_id += 1;
            connected += 1;
        }

        Ok(connected)
    }

    /// Connected (id, name) pairs
    pub fn connected(&self) -> Vec<(u32, String)> {
        self.connections
            .iter()
            .map(|c| (c.id, c.name.clone()))
            .collect()
    }

    /// Tear down all connections, emitting a disconnect message per source.
    /// Safe to call repeatedly.
    pub fn disconnect_all(&mut self) {
        for conn in self.connections.drain(..) {
            debug!("Disconnecting MIDI source #{}: {}", conn.id, conn.name);
            let _ = self
                .event_tx
                .try_send(SourceMessage::Disconnected { source_id: conn.id });
        }
    }
}

impl Drop for MidiSources {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
