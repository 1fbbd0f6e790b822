//! # Streams configuration
//!
//! All runtime settings live in one explicit [`StreamsConfig`] value. It can be
//! built in code with the `with_*` methods or from Kafka-style string
//! properties with [`StreamsConfig::from_props`].
//!
//! | property                      | default    |
//! |-------------------------------|------------|
//! | `application.id`              | required   |
//! | `bootstrap.servers`           | required   |
//! | `default.key.serde`           | `bytes`    |
//! | `default.value.serde`         | `bytes`    |
//! | `default.timestamp.extractor` | `record`   |
//! | `commit.interval.ms`          | `100`      |
//! | `num.stream.threads`          | `1`        |
//! | `poll.ms`                     | `100`      |
//! | `auto.offset.reset`           | `earliest` |
//! | `producer.retries`            | `3`        |
//! | `retry.backoff.ms`            | `50`       |

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::SerdeKind;
use crate::consumer::OffsetReset;
use crate::error::{Result, StreamsError};
use crate::time::TimestampExtractorKind;

pub const APPLICATION_ID: &str = "application.id";
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
pub const DEFAULT_KEY_SERDE: &str = "default.key.serde";
pub const DEFAULT_VALUE_SERDE: &str = "default.value.serde";
pub const DEFAULT_TIMESTAMP_EXTRACTOR: &str = "default.timestamp.extractor";
pub const COMMIT_INTERVAL_MS: &str = "commit.interval.ms";
pub const NUM_STREAM_THREADS: &str = "num.stream.threads";
pub const POLL_MS: &str = "poll.ms";
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
pub const PRODUCER_RETRIES: &str = "producer.retries";
pub const RETRY_BACKOFF_MS: &str = "retry.backoff.ms";

/// Upper bound for `poll.ms`; stream threads block at most this long.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamsConfig {
    /// Consumer group of the runtime and prefix of its internal topics.
    pub application_id: String,
    pub bootstrap_servers: Vec<String>,
    pub default_key_serde: SerdeKind,
    pub default_value_serde: SerdeKind,
    pub timestamp_extractor: TimestampExtractorKind,
    pub commit_interval: Duration,
    pub num_stream_threads: usize,
    pub poll_timeout: Duration,
    pub auto_offset_reset: OffsetReset,
    /// Retries for transient failures when writing to sink and repartition topics.
    pub producer_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            bootstrap_servers: Vec::new(),
            default_key_serde: SerdeKind::Bytes,
            default_value_serde: SerdeKind::Bytes,
            timestamp_extractor: TimestampExtractorKind::Record,
            commit_interval: Duration::from_millis(100),
            num_stream_threads: 1,
            poll_timeout: Duration::from_millis(100),
            auto_offset_reset: OffsetReset::Earliest,
            producer_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| StreamsError::Config(format!("invalid value '{value}' for {key}: {e}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl StreamsConfig {
    /// Create a config with the two required settings and defaults for the rest.
    pub fn new(application_id: impl Into<String>, bootstrap_servers: &str) -> Self {
        Self {
            application_id: application_id.into(),
            bootstrap_servers: parse_list(bootstrap_servers),
            ..Self::default()
        }
    }

    /// Build from string properties. Unknown keys are logged and ignored.
    pub fn from_props<I, K, V>(props: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in props {
            config.set(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Apply one property.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            APPLICATION_ID => self.application_id = value.trim().to_string(),
            BOOTSTRAP_SERVERS => self.bootstrap_servers = parse_list(value),
            DEFAULT_KEY_SERDE => self.default_key_serde = value.parse()?,
            DEFAULT_VALUE_SERDE => self.default_value_serde = value.parse()?,
            DEFAULT_TIMESTAMP_EXTRACTOR => self.timestamp_extractor = value.parse()?,
            COMMIT_INTERVAL_MS => {
                self.commit_interval = Duration::from_millis(parse(key, value)?)
            }
            NUM_STREAM_THREADS => self.num_stream_threads = parse(key, value)?,
            POLL_MS => self.poll_timeout = Duration::from_millis(parse(key, value)?),
            AUTO_OFFSET_RESET => self.auto_offset_reset = value.parse()?,
            PRODUCER_RETRIES => self.producer_retries = parse(key, value)?,
            RETRY_BACKOFF_MS => self.retry_backoff = Duration::from_millis(parse(key, value)?),
            other => tracing::warn!(property = other, "ignoring unknown streams property"),
        }
        Ok(())
    }

    pub fn with_default_key_serde(mut self, serde: SerdeKind) -> Self {
        self.default_key_serde = serde;
        self
    }

    pub fn with_default_value_serde(mut self, serde: SerdeKind) -> Self {
        self.default_value_serde = serde;
        self
    }

    pub fn with_timestamp_extractor(mut self, extractor: TimestampExtractorKind) -> Self {
        self.timestamp_extractor = extractor;
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn with_num_stream_threads(mut self, threads: usize) -> Self {
        self.num_stream_threads = threads;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn with_producer_retries(mut self, retries: u32) -> Self {
        self.producer_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Check the settings against the broker the runtime will talk to.
    pub fn validate(&self, broker_address: &str) -> Result<()> {
        if self.application_id.is_empty() {
            return Err(StreamsError::Config(format!("{APPLICATION_ID} is required")));
        }
        if let Some(c) = self
            .application_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(StreamsError::Config(format!(
                "{APPLICATION_ID} '{}' contains illegal character '{c}'",
                self.application_id
            )));
        }
        if self.bootstrap_servers.is_empty() {
            return Err(StreamsError::Config(format!(
                "{BOOTSTRAP_SERVERS} is required"
            )));
        }
        if !self.bootstrap_servers.iter().any(|s| s == broker_address) {
            return Err(StreamsError::Config(format!(
                "none of {BOOTSTRAP_SERVERS} [{}] is reachable (broker is at {broker_address})",
                self.bootstrap_servers.join(",")
            )));
        }
        if self.num_stream_threads == 0 {
            return Err(StreamsError::Config(format!(
                "{NUM_STREAM_THREADS} must be at least 1"
            )));
        }
        if self.commit_interval.is_zero() {
            return Err(StreamsError::Config(format!(
                "{COMMIT_INTERVAL_MS} must be positive"
            )));
        }
        if self.poll_timeout.is_zero() || self.poll_timeout > MAX_POLL_TIMEOUT {
            return Err(StreamsError::Config(format!(
                "{POLL_MS} must be in (0, {}]",
                MAX_POLL_TIMEOUT.as_millis()
            )));
        }
        Ok(())
    }

    /// The effective settings as properties.
    pub fn to_props(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            (APPLICATION_ID, self.application_id.clone()),
            (BOOTSTRAP_SERVERS, self.bootstrap_servers.join(",")),
            (DEFAULT_KEY_SERDE, self.default_key_serde.to_string()),
            (DEFAULT_VALUE_SERDE, self.default_value_serde.to_string()),
            (
                DEFAULT_TIMESTAMP_EXTRACTOR,
                self.timestamp_extractor.to_string(),
            ),
            (
                COMMIT_INTERVAL_MS,
                self.commit_interval.as_millis().to_string(),
            ),
            (NUM_STREAM_THREADS, self.num_stream_threads.to_string()),
            (POLL_MS, self.poll_timeout.as_millis().to_string()),
            (AUTO_OFFSET_RESET, self.auto_offset_reset.to_string()),
            (PRODUCER_RETRIES, self.producer_retries.to_string()),
            (RETRY_BACKOFF_MS, self.retry_backoff.as_millis().to_string()),
        ])
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
