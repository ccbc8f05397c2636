//! Dispatch debouncing for discrete triggers
//!
//! Cheap pad hardware bounces, and some surfaces re-send note-ons while a
//! button is held. Discrete (edge-triggered) events get a minimum re-fire
//! interval per (cell, source, trigger) key; continuous events always pass
//! because every position/delta sample matters. The suppression window is
//! anchored to the last accepted dispatch and does not reset on suppressed
//! repeats.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::midi::{Event, Trigger};

/// Map size that triggers a prune sweep
const PRUNE_THRESHOLD: usize = 512;

/// Entries older than this are discarded during a sweep
const RETENTION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DebounceKey {
    cell: usize,
    source_id: u32,
    trigger: Trigger,
}

/// Suppresses rapid repeated discrete dispatches per (cell, source, trigger)
pub struct DispatchDebouncer {
    window: Duration,
    last_accepted: HashMap<DebounceKey, Instant>,
}

impl DispatchDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Whether this event should reach plugin dispatch for the given cell
    pub fn should_dispatch(&mut self, event: &Event, cell: usize) -> bool {
        self.should_dispatch_at(event, cell, Instant::now())
    }

    fn should_dispatch_at(&mut self, event: &Event, cell: usize, now: Instant) -> bool {
        // Continuous kinds carry live position/delta data; never gate them
        if !event.kind.is_discrete() {
            return true;
        }

        let Some(trigger) = event.trigger() else {
            return false;
        };

        let key = DebounceKey {
            cell,
            source_id: event.source_id,
            trigger,
        };

        if let Some(last) = self.last_accepted.get(&key) {
            if now.duration_since(*last) < self.window {
                // Window stays anchored to the last ACCEPTED dispatch
                return false;
            }
        }

        self.last_accepted.insert(key, now);
        self.prune_if_needed(now);
        true
    }

    /// Amortized cleanup: one sweep once the map outgrows the threshold,
    /// rather than per-entry eviction.
    fn prune_if_needed(&mut self, now: Instant) {
        if self.last_accepted.len() <= PRUNE_THRESHOLD {
            return;
        }

        let before = self.last_accepted.len();
        self.last_accepted
            .retain(|_, ts| now.duration_since(*ts) < RETENTION);
        debug!(
            "debounce map pruned: {} -> {} entries",
            before,
            self.last_accepted.len()
        );
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
