//! Concrete queue engines and the Etherscan block source.

pub mod etherscan;
pub mod in_memory;
#[cfg(feature = "queue-redis")]
pub mod redis;
#[cfg(feature = "queue-rocksdb")]
pub mod rocksdb;

use crate::config::{BackendKind, BackendSettings};
use crate::domain::ports::SharedQueueBackend;
use crate::error::Result;
use in_memory::InMemoryQueue;
use std::sync::Arc;

/// Builds the engine for `kind`. Engines not compiled into this binary fall
/// back to the in-memory queue with a warning.
pub fn build_backend(kind: BackendKind, settings: &BackendSettings) -> Result<SharedQueueBackend> {
    match kind {
        BackendKind::Memory => Ok(Arc::new(InMemoryQueue::new())),
        BackendKind::RocksDb => build_rocksdb(settings),
        BackendKind::Redis => build_redis(settings),
    }
}

#[cfg(feature = "queue-rocksdb")]
fn build_rocksdb(settings: &BackendSettings) -> Result<SharedQueueBackend> {
    Ok(Arc::new(rocksdb::RocksDbQueue::open(&settings.rocksdb_path)?))
}

#[cfg(not(feature = "queue-rocksdb"))]
fn build_rocksdb(_settings: &BackendSettings) -> Result<SharedQueueBackend> {
    tracing::warn!(
        "WARNING: RocksDB queue requested, but 'queue-rocksdb' feature is not enabled. Falling back to In-Memory queue."
    );
    Ok(Arc::new(InMemoryQueue::new()))
}

#[cfg(feature = "queue-redis")]
fn build_redis(settings: &BackendSettings) -> Result<SharedQueueBackend> {
    Ok(Arc::new(redis::RedisQueue::new(&settings.redis_url)?))
}

#[cfg(not(feature = "queue-redis"))]
fn build_redis(_settings: &BackendSettings) -> Result<SharedQueueBackend> {
    tracing::warn!(
        "WARNING: Redis queue requested, but 'queue-redis' feature is not enabled. Falling back to In-Memory queue."
    );
    Ok(Arc::new(InMemoryQueue::new()))
}
