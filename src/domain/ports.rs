use super::block::Block;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Ask the engine to keep the message across its own restarts.
    pub persistent: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { persistent: true }
    }
}

/// A message handed out by [`QueueBackend::receive`]. It stays owned by the
/// consumer until it is acked or nacked.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Engine-specific receipt used to settle the delivery.
    pub id: String,
    pub payload: String,
    /// How many times this message was handed out before.
    pub redeliveries: u32,
}

/// Transport for pipeline tasks. Each queue has a single consumer which
/// settles one delivery before receiving the next.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Checks the engine is reachable.
    async fn connect(&self) -> Result<()>;

    /// Creates the queue if it does not exist yet.
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Appends a message to the tail of `queue`.
    async fn publish(&self, queue: &str, payload: String, options: PublishOptions) -> Result<()>;

    /// Waits for the next message.
    ///
    /// Dropping the future before it resolves leaves the queue untouched on
    /// the in-memory and RocksDB engines. On Redis a claim already sent to
    /// the server completes anyway; the message then sits in flight, unseen
    /// by this run, until [`QueueBackend::purge`] drops it.
    async fn receive(&self, queue: &str) -> Result<Delivery>;

    /// Settles a delivery for good.
    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()>;

    /// Rejects a delivery, either putting it back at the head of the queue or
    /// dropping it into the engine's dead-letter area.
    async fn nack(&self, queue: &str, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// True once every message known to the queue has been acknowledged.
    async fn drained(&self, queue: &str) -> Result<bool>;

    /// Drops pending and in-flight messages. Dead letters are kept.
    async fn purge(&self, queue: &str) -> Result<()>;

    /// Releases connections. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Source of blocks.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Fetches one block. A remote-side failure may come back either as an
    /// error or as a [`Block`] carrying `error`.
    async fn fetch_block(&self, block_number_hex: &str) -> Result<Block>;

    /// Number of the most recent block, as `0x…`.
    async fn latest_block_number(&self) -> Result<String>;
}

pub type SharedQueueBackend = Arc<dyn QueueBackend>;
pub type SharedBlockFetcher = Arc<dyn BlockFetcher>;
