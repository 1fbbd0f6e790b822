use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StreamsError;
use crate::types::{EventTime, RawRecord};

/// Milliseconds since the Unix epoch.
pub fn current_time_ms() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EventTime)
        .unwrap_or(0)
}

/// Decides the event time of a record as it enters a task.
///
/// `partition_time` is the highest timestamp the task has seen on the record's
/// partition so far, or `-1` before the first record.
pub trait TimestampExtractor: Send + Sync {
    fn extract(&self, record: &RawRecord, partition_time: EventTime) -> EventTime;
}

/// Uses the timestamp stored with the record.
///
/// Records with a negative timestamp fall back to the partition time so they
/// land in the most recent window rather than one long evicted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTimestampExtractor;

impl TimestampExtractor for RecordTimestampExtractor {
    fn extract(&self, record: &RawRecord, partition_time: EventTime) -> EventTime {
        if record.timestamp >= 0 {
            record.timestamp
        } else {
            partition_time.max(0)
        }
    }
}

/// Ignores the record and uses processing time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallclockTimestampExtractor;

impl TimestampExtractor for WallclockTimestampExtractor {
    fn extract(&self, _record: &RawRecord, _partition_time: EventTime) -> EventTime {
        current_time_ms()
    }
}

impl<F> TimestampExtractor for F
where
    F: Fn(&RawRecord, EventTime) -> EventTime + Send + Sync,
{
    fn extract(&self, record: &RawRecord, partition_time: EventTime) -> EventTime {
        self(record, partition_time)
    }
}

/// Extractors selectable through `default.timestamp.extractor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampExtractorKind {
    #[default]
    Record,
    Wallclock,
}

impl TimestampExtractorKind {
    pub fn extractor(&self) -> Box<dyn TimestampExtractor> {
        match self {
            TimestampExtractorKind::Record => Box::new(RecordTimestampExtractor),
            TimestampExtractorKind::Wallclock => Box::new(WallclockTimestampExtractor),
        }
    }
}

impl FromStr for TimestampExtractorKind {
    type Err = StreamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(TimestampExtractorKind::Record),
            "wallclock" => Ok(TimestampExtractorKind::Wallclock),
            other => Err(StreamsError::Config(format!(
                "unknown timestamp extractor '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TimestampExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampExtractorKind::Record => f.write_str("record"),
            TimestampExtractorKind::Wallclock => f.write_str("wallclock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn raw(timestamp: EventTime) -> RawRecord {
        RawRecord {
            key: Bytes::new(),
            value: Bytes::new(),
            timestamp,
            partition: 0,
            offset: 0,
        }
    }

    #[test]
    fn test_record_extractor_uses_record_time() {
        assert_eq!(RecordTimestampExtractor.extract(&raw(1_500), 9_000), 1_500);
    }

    #[test]
    fn test_record_extractor_negative_falls_back() {
        assert_eq!(RecordTimestampExtractor.extract(&raw(-5), 9_000), 9_000);
        assert_eq!(RecordTimestampExtractor.extract(&raw(-5), -1), 0);
    }

    #[test]
    fn test_wallclock_extractor_is_current() {
        let before = current_time_ms();
        let ts = WallclockTimestampExtractor.extract(&raw(1), -1);
        assert!(ts >= before);
        assert!(ts <= current_time_ms());
    }

    #[test]
    fn test_closure_extractor() {
        let doubled = |record: &RawRecord, _: EventTime| record.timestamp * 2;
        assert_eq!(doubled.extract(&raw(21), 0), 42);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "Wallclock".parse::<TimestampExtractorKind>().unwrap(),
            TimestampExtractorKind::Wallclock
        );
        assert_eq!(
            TimestampExtractorKind::default().to_string(),
            "record"
        );
        assert!("event".parse::<TimestampExtractorKind>().is_err());
    }
}
