//! # Windows
//!
//! Fixed-size time windows used by windowed aggregations.
//!
//! [`TimeWindows::of`] creates tumbling windows aligned to multiples of the
//! size; [`TimeWindows::advance_by`] turns them into hopping windows, where a
//! record belongs to every window covering its timestamp.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamsError;
use crate::types::EventTime;

/// Windows are retained for one day unless configured otherwise.
pub const DEFAULT_RETENTION_MS: EventTime = 24 * 60 * 60 * 1000;

/// A half-open event-time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: EventTime,
    pub end: EventTime,
}

impl TimeWindow {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.end - 1
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Key of a windowed aggregation result: the grouping key plus its window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Windowed<K> {
    pub key: K,
    pub window: TimeWindow,
}

impl<K> Windowed<K> {
    pub fn new(key: K, window: TimeWindow) -> Self {
        Self { key, window }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn into_key(self) -> K {
        self.key
    }
}

impl<K: std::fmt::Display> std::fmt::Display for Windowed<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.key, self.window)
    }
}

/// Window specification: size, advance and retention, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindows {
    size_ms: EventTime,
    advance_ms: EventTime,
    retention_ms: EventTime,
}

impl TimeWindows {
    /// Tumbling windows of the given `size`.
    pub fn of(size: Duration) -> Self {
        let size_ms = size.as_millis() as EventTime;
        Self {
            size_ms,
            advance_ms: size_ms,
            retention_ms: DEFAULT_RETENTION_MS.max(size_ms),
        }
    }

    /// Hopping windows that start every `advance`.
    pub fn advance_by(mut self, advance: Duration) -> Self {
        self.advance_ms = advance.as_millis() as EventTime;
        self
    }

    /// How long a window is kept after it ends. Records for a window that has
    /// already been evicted are dropped.
    pub fn until(mut self, retention: Duration) -> Self {
        self.retention_ms = retention.as_millis() as EventTime;
        self
    }

    pub fn size_ms(&self) -> EventTime {
        self.size_ms
    }

    pub fn advance_ms(&self) -> EventTime {
        self.advance_ms
    }

    pub fn retention_ms(&self) -> EventTime {
        self.retention_ms
    }

    pub fn validate(&self) -> Result<(), StreamsError> {
        if self.size_ms <= 0 {
            return Err(StreamsError::Config(
                "window size must be positive".to_string(),
            ));
        }
        if self.advance_ms <= 0 || self.advance_ms > self.size_ms {
            return Err(StreamsError::Config(format!(
                "window advance must be in (0, {}] ms, got {}",
                self.size_ms, self.advance_ms
            )));
        }
        if self.retention_ms < self.size_ms {
            return Err(StreamsError::Config(format!(
                "window retention {} ms is shorter than the window size {} ms",
                self.retention_ms, self.size_ms
            )));
        }
        Ok(())
    }

    /// Windows containing `timestamp`, oldest first.
    pub fn windows_for(&self, timestamp: EventTime) -> Vec<TimeWindow> {
        // Walk back from the last window start by `advance` until no window
        // covers ts. Bounds past the EventTime range are clamped to it.
        let last_start = timestamp.saturating_sub(timestamp.rem_euclid(self.advance_ms));
        let earliest = timestamp.saturating_sub(self.size_ms);
        let mut windows = Vec::new();
        let mut start = last_start;
        while start > earliest {
            windows.push(TimeWindow::new(start, start.saturating_add(self.size_ms)));
            match start.checked_sub(self.advance_ms) {
                Some(previous) => start = previous,
                None => break,
            }
        }
        windows.reverse();
        windows
    }
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
