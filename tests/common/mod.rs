#![allow(dead_code)]

use async_trait::async_trait;
use blockdelta::domain::block::{Block, BlockTransaction};
use blockdelta::domain::ports::BlockFetcher;
use blockdelta::error::{PipelineError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Serves blocks from a fixed table, optionally after a delay.
#[derive(Default)]
pub struct StaticFetcher {
    blocks: HashMap<String, Block>,
    delay: Duration,
    fail: HashMap<String, String>,
    latest: String,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            latest: "0x100".to_string(),
            ..Default::default()
        }
    }

    pub fn with_block(mut self, hex: &str, block: Block) -> Self {
        self.blocks.insert(hex.to_string(), block);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `fetch_block(hex)` returns a transport error.
    pub fn failing_at(mut self, hex: &str, message: &str) -> Self {
        self.fail.insert(hex.to_string(), message.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockFetcher for StaticFetcher {
    async fn fetch_block(&self, block_number_hex: &str) -> Result<Block> {
        self.requested
            .lock()
            .unwrap()
            .push(block_number_hex.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = self.fail.get(block_number_hex) {
            return Err(PipelineError::fetch(block_number_hex, message.clone()));
        }
        Ok(self
            .blocks
            .get(block_number_hex)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_block_number(&self) -> Result<String> {
        Ok(self.latest.clone())
    }
}

pub fn tx(from: &str, to: &str, value: &str) -> BlockTransaction {
    BlockTransaction::new(from, to, value)
}

pub fn block(transactions: Vec<BlockTransaction>) -> Block {
    Block::new(transactions)
}
