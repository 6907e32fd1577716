use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Connection(String),
    #[error("failed to fetch block {block}: {message}")]
    Fetch { block: String, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("the waiting time has expired! ({} msec)", budget.as_millis())]
    DeadlineExceeded { budget: Duration },
    #[error("queue error: {0}")]
    Queue(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn fetch(block: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            block: block.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "queue-rocksdb")]
impl From<rocksdb::Error> for PipelineError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Queue(format!("RocksDB error: {}", e))
    }
}

#[cfg(feature = "queue-redis")]
impl From<redis::RedisError> for PipelineError {
    fn from(e: redis::RedisError) -> Self {
        Self::Queue(format!("Redis error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
