use crate::domain::ports::{Delivery, PublishOptions, QueueBackend};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A job as stored in the Redis lists.
#[derive(Debug, Serialize, Deserialize)]
struct Job {
    id: u64,
    payload: String,
    redeliveries: u32,
}

/// A persistent job queue on top of Redis lists.
///
/// Every queue owns a `wait` list, an `active` list for claimed jobs and a
/// `failed` list for jobs rejected without requeue. Jobs are claimed with
/// `LMOVE` so a crashed consumer leaves them visible in `active`. Receiving
/// polls instead of blocking, which keeps the multiplexed connection free for
/// the other stage.
pub struct RedisQueue {
    client: redis::Client,
    prefix: String,
    poll_interval: Duration,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisQueue {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            PipelineError::Connection(format!("Invalid Redis URL '{}': {}", redis_url, e))
        })?;
        Ok(Self {
            client,
            prefix: "blockdelta".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            conn: RwLock::new(None),
        })
    }

    /// Namespace for every key this queue touches.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, queue: &str, list: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, list)
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| PipelineError::Queue("Redis queue is not connected".to_string()))
    }

    fn decode(raw: &str) -> Result<Job> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                PipelineError::Connection(format!("Error connecting to the Redis server! {}", e))
            })?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                PipelineError::Connection(format!("Error connecting to the Redis server! {}", e))
            })?;

        info!("Successfully connected to Redis");
        *self.conn.write().await = Some(conn);
        Ok(())
    }

    async fn declare(&self, _queue: &str) -> Result<()> {
        // Lists spring into existence on first push.
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: String, _options: PublishOptions) -> Result<()> {
        let mut conn = self.conn().await?;
        let id: u64 = redis::cmd("INCR")
            .arg(self.key(queue, "id"))
            .query_async(&mut conn)
            .await?;
        let job = serde_json::to_string(&Job {
            id,
            payload,
            redeliveries: 0,
        })?;
        let _: () = redis::cmd("LPUSH")
            .arg(self.key(queue, "wait"))
            .arg(job)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery> {
        let wait = self.key(queue, "wait");
        let active = self.key(queue, "active");
        loop {
            let mut conn = self.conn().await?;
            // Once sent, the claim lands in `active` even if this future is
            // dropped; such a job waits there for the end-of-run purge.
            let claimed: Option<String> = redis::cmd("LMOVE")
                .arg(&wait)
                .arg(&active)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;

            if let Some(raw) = claimed {
                let job = Self::decode(&raw)?;
                return Ok(Delivery {
                    id: raw,
                    payload: job.payload,
                    redeliveries: job.redeliveries,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("LREM")
            .arg(self.key(queue, "active"))
            .arg(1)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn nack(&self, queue: &str, delivery: &Delivery, requeue: bool) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut job = Self::decode(&delivery.id)?;

        // RPUSH puts a retried job next in line; failed jobs are parked.
        let (target, command) = if requeue {
            job.redeliveries += 1;
            (self.key(queue, "wait"), "RPUSH")
        } else {
            debug!(queue, job = job.id, "moving job to the failed list");
            (self.key(queue, "failed"), "LPUSH")
        };

        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.key(queue, "active"))
            .arg(1)
            .arg(&delivery.id)
            .ignore()
            .cmd(command)
            .arg(target)
            .arg(serde_json::to_string(&job)?)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn drained(&self, queue: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let waiting: usize = redis::cmd("LLEN")
            .arg(self.key(queue, "wait"))
            .query_async(&mut conn)
            .await?;
        let active: usize = redis::cmd("LLEN")
            .arg(self.key(queue, "active"))
            .query_async(&mut conn)
            .await?;
        Ok(waiting == 0 && active == 0)
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("DEL")
            .arg(self.key(queue, "wait"))
            .arg(self.key(queue, "active"))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.conn.write().await.take();
        Ok(())
    }
}
