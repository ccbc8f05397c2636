//! padgrid-gw - bridge MIDI control surfaces to OBS Studio
//!
//! Pipeline: raw MIDI bytes -> parser -> mode classifier -> grid mapping
//! lookup -> debouncer -> OBS bridge dispatch. A remote gateway exposes
//! the same grid to a companion client over a small length-framed
//! protocol with LAN discovery.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod grid;
pub mod midi;
pub mod paths;
pub mod plugins;
pub mod router;
