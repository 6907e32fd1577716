use crate::error::PipelineError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Timing knobs for one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Cadence of the scheduler emitting download tasks.
    pub request_interval: Duration,
    /// Time allowance per block; the run deadline is `blocks * block_budget`.
    pub block_budget: Duration,
    /// Publish tasks as persistent messages.
    pub persistent: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(200),
            block_budget: Duration::from_millis(1000),
            persistent: true,
        }
    }
}

impl PipelineConfig {
    /// Total budget of a run over `blocks_amount` blocks.
    ///
    /// ```
    /// use blockdelta::config::PipelineConfig;
    /// use std::time::Duration;
    ///
    /// assert_eq!(PipelineConfig::default().deadline_for(3), Duration::from_secs(3));
    /// ```
    pub fn deadline_for(&self, blocks_amount: u32) -> Duration {
        self.block_budget * blocks_amount
    }
}

/// Queue engines a run can be transported by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process FIFO.
    Memory,
    /// Durable broker on RocksDB.
    RocksDb,
    /// Persistent job queue on Redis.
    Redis,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::Memory, Self::RocksDb, Self::Redis];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::RocksDb => "rocksdb",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PipelineError::Validation("incorrect library name!".to_string()))
    }
}

/// Values used when a query parameter is omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefaults {
    pub library: BackendKind,
    pub blocks_amount: u32,
    pub last_block: String,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            library: BackendKind::Memory,
            blocks_amount: 3,
            last_block: "0x10d4f".to_string(),
        }
    }
}

/// Where the engines live.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub redis_url: String,
    pub rocksdb_path: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            rocksdb_path: PathBuf::from("./blockdelta-queue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("bull".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_deadline_scales_with_blocks() {
        let config = PipelineConfig::default();
        assert_eq!(config.deadline_for(3), Duration::from_secs(3));
    }
}
