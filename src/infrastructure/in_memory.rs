use crate::domain::ports::{Delivery, PublishOptions, QueueBackend};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Dead letters kept per queue; older ones are dropped first.
pub const DEAD_LETTER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    payload: String,
    redeliveries: u32,
}

impl Message {
    fn delivery(&self) -> Delivery {
        Delivery {
            id: self.tag.to_string(),
            payload: self.payload.clone(),
            redeliveries: self.redeliveries,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Message>,
    dead_letters: VecDeque<Message>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
    published: Notify,
    closed: AtomicBool,
}

/// An in-process FIFO engine.
///
/// Uses `Arc<Mutex<HashMap<String, QueueState>>>` so clones share the same
/// queues. Nothing survives the process.
#[derive(Default, Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    /// Creates a new engine with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages rejected without requeue, oldest first. Only the latest
    /// [`DEAD_LETTER_CAPACITY`] are kept.
    pub async fn dead_letters(&self, queue: &str) -> Vec<String> {
        let queues = self.inner.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.dead_letters.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(PipelineError::Queue("in-memory queue is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn parse_tag(delivery: &Delivery) -> Result<u64> {
        delivery
            .id
            .parse()
            .map_err(|_| PipelineError::Queue(format!("invalid delivery tag '{}'", delivery.id)))
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.inner.closed.store(false, Ordering::Release);
        Ok(())
    }

    async fn declare(&self, queue: &str) -> Result<()> {
        self.ensure_open()?;
        let mut queues = self.inner.queues.lock().await;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: String, _options: PublishOptions) -> Result<()> {
        self.ensure_open()?;
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        {
            let mut queues = self.inner.queues.lock().await;
            queues
                .entry(queue.to_string())
                .or_default()
                .ready
                .push_back(Message {
                    tag,
                    payload,
                    redeliveries: 0,
                });
        }
        self.inner.published.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery> {
        loop {
            let published = self.inner.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            self.ensure_open()?;
            {
                let mut queues = self.inner.queues.lock().await;
                let state = queues.entry(queue.to_string()).or_default();
                if let Some(message) = state.ready.pop_front() {
                    let delivery = message.delivery();
                    state.unacked.insert(message.tag, message);
                    return Ok(delivery);
                }
            }

            published.await;
        }
    }

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<()> {
        let tag = Self::parse_tag(delivery)?;
        let mut queues = self.inner.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.unacked.remove(&tag);
        }
        Ok(())
    }

    async fn nack(&self, queue: &str, delivery: &Delivery, requeue: bool) -> Result<()> {
        let tag = Self::parse_tag(delivery)?;
        {
            let mut queues = self.inner.queues.lock().await;
            let Some(state) = queues.get_mut(queue) else {
                return Ok(());
            };
            let Some(mut message) = state.unacked.remove(&tag) else {
                return Ok(());
            };
            if requeue {
                message.redeliveries += 1;
                state.ready.push_front(message);
            } else {
                debug!(queue, tag, "dead-lettering message");
                if state.dead_letters.len() == DEAD_LETTER_CAPACITY {
                    state.dead_letters.pop_front();
                }
                state.dead_letters.push_back(message);
            }
        }
        if requeue {
            self.inner.published.notify_waiters();
        }
        Ok(())
    }

    async fn drained(&self, queue: &str) -> Result<bool> {
        let queues = self.inner.queues.lock().await;
        Ok(queues
            .get(queue)
            .is_none_or(|q| q.ready.is_empty() && q.unacked.is_empty()))
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        let mut queues = self.inner.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.ready.clear();
            state.unacked.clear();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.published.notify_waiters();
        Ok(())
    }
}
