//! # Window Store
//!
//! Task-local state of a windowed aggregation: one accumulator per
//! (serialized key, window).
//!
//! The store tracks the task's stream time (the highest record timestamp it
//! has observed). A window is retained while `end + retention > stream_time`;
//! once stream time passes that bound the window is evicted and later records
//! for it are treated as late and dropped by the caller.
//!
//! Entries are ordered by window start, so eviction pops from the front.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::types::{BoxedValue, EventTime};
use crate::window::TimeWindow;

/// One aggregated window.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    /// The deserialized grouping key, kept for emitting results.
    pub key: BoxedValue,
    pub window: TimeWindow,
    pub value: BoxedValue,
}

#[derive(Debug)]
pub struct WindowStore {
    name: String,
    retention_ms: EventTime,
    windows: BTreeMap<(EventTime, Bytes), WindowEntry>,
    stream_time: EventTime,
    dropped_late: u64,
}

impl WindowStore {
    pub fn new(name: impl Into<String>, retention_ms: EventTime) -> Self {
        Self {
            name: name.into(),
            retention_ms,
            windows: BTreeMap::new(),
            stream_time: EventTime::MIN,
            dropped_late: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_time(&self) -> EventTime {
        self.stream_time
    }

    /// Advance stream time to `timestamp` (never backwards) and evict
    /// windows that fell out of retention.
    pub fn observe(&mut self, timestamp: EventTime) {
        if timestamp <= self.stream_time {
            return;
        }
        self.stream_time = timestamp;
        let retention = self.retention_ms;
        while let Some(entry) = self.windows.first_entry() {
            if entry.get().window.end.saturating_add(retention) > timestamp {
                break;
            }
            let removed = entry.remove();
            tracing::trace!(store = %self.name, window = %removed.window, "evicted window");
        }
    }

    /// True once the window can no longer be updated.
    pub fn is_expired(&self, window: &TimeWindow) -> bool {
        window.end.saturating_add(self.retention_ms) <= self.stream_time
    }

    pub fn get(&self, key: &Bytes, window: &TimeWindow) -> Option<&WindowEntry> {
        self.windows.get(&(window.start, key.clone()))
    }

    pub fn put(&mut self, key_bytes: Bytes, key: BoxedValue, window: TimeWindow, value: BoxedValue) {
        self.windows
            .insert((window.start, key_bytes), WindowEntry { key, window, value });
    }

    /// All retained windows, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        self.windows.values()
    }

    pub fn record_late(&mut self) {
        self.dropped_late += 1;
    }

    /// Records dropped because their window had been evicted.
    pub fn dropped_late(&self) -> u64 {
        self.dropped_late
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
