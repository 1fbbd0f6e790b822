use thiserror::Error;

use crate::types::TopicPartition;

pub type Result<T, E = StreamsError> = std::result::Result<T, E>;

/// Failures reported by the in-process broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("unknown partition {0}")]
    UnknownPartition(TopicPartition),

    #[error("topic {0} already exists")]
    TopicExists(String),

    #[error("topic {0} must have at least one partition")]
    NoPartitions(String),

    #[error("broker unavailable - {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Transient failures are retried by producers and record collectors.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Failures while encoding or decoding keys and values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerdeError {
    #[error("serialize failed for topic {topic} - {reason}")]
    Serialize { topic: String, reason: String },

    #[error("deserialize failed for topic {topic} - {reason}")]
    Deserialize { topic: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamsError {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Illegal State - {0}")]
    IllegalState(String),

    #[error("Processing Error in task {task} - {message}")]
    Processing {
        task: TopicPartition,
        message: String,
    },

    #[error("Serde Error - {0}")]
    Serde(#[from] SerdeError),

    #[error("Broker Error - {0}")]
    Broker(#[from] BrokerError),

    #[error("Type mismatch - expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Producer Error - {0}")]
    Producer(String),

    #[error("Thread Error - {0}")]
    Thread(String),
}
