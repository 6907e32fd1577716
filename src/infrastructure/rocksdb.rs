use crate::domain::ports::{Delivery, PublishOptions, QueueBackend};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

/// Column Family holding live messages, keyed `<queue>/<sequence>`.
pub const CF_MESSAGES: &str = "messages";
/// Column Family holding messages rejected without requeue.
pub const CF_DEAD_LETTERS: &str = "dead_letters";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    payload: String,
    redeliveries: u32,
    /// Handed to a consumer and not yet settled.
    claimed: bool,
}

struct Inner {
    db: DB,
    next_sequence: AtomicU64,
    claim: Mutex<()>,
    published: Notify,
}

/// A durable broker backed by RocksDB.
///
/// Messages are written before `publish` returns and survive restarts.
/// Anything a consumer had claimed but not settled when the process died is
/// handed out again after the next `open`, flagged as a redelivery.
///
/// This struct is thread-safe (`Clone` shares the underlying database).
#[derive(Clone)]
pub struct RocksDbQueue {
    inner: Arc<Inner>,
}

fn message_key(queue: &str, sequence: u64) -> String {
    format!("{}/{:020}", queue, sequence)
}

fn queue_prefix(queue: &str) -> String {
    format!("{}/", queue)
}

fn decode(bytes: &[u8]) -> Result<StoredMessage> {
    serde_json::from_slice(bytes).map_err(|e| {
        PipelineError::Queue(format!("Deserialization error: {}", e))
    })
}

impl RocksDbQueue {
    /// Opens or creates the broker at `path`, ensuring the "messages" and
    /// "dead_letters" column families exist, and releases stale claims.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_messages = ColumnFamilyDescriptor::new(CF_MESSAGES, Options::default());
        let cf_dead_letters = ColumnFamilyDescriptor::new(CF_DEAD_LETTERS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_messages, cf_dead_letters])?;

        let queue = Self {
            inner: Arc::new(Inner {
                db,
                next_sequence: AtomicU64::new(0),
                claim: Mutex::new(()),
                published: Notify::new(),
            }),
        };
        queue.recover()?;
        Ok(queue)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.inner
            .db
            .cf_handle(name)
            .ok_or_else(|| PipelineError::Queue(format!("{} column family not found", name)))
    }

    /// Resumes the sequence after the highest stored key and turns unsettled
    /// claims back into ready messages.
    fn recover(&self) -> Result<()> {
        let cf = self.cf(CF_MESSAGES)?;
        let mut highest = 0;
        let mut released = 0;
        let mut batch = WriteBatch::default();

        for item in self.inner.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            if let Some(sequence) = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.rsplit_once('/'))
                .and_then(|(_, seq)| seq.parse::<u64>().ok())
            {
                highest = highest.max(sequence + 1);
            }

            let mut message = decode(&value)?;
            if message.claimed {
                message.claimed = false;
                message.redeliveries += 1;
                batch.put_cf(cf, &key, serde_json::to_vec(&message)?);
                released += 1;
            }
        }

        self.inner.db.write(batch)?;
        self.inner.next_sequence.store(highest, Ordering::Release);
        if released > 0 {
            info!(released, "released unsettled messages from a previous process");
        }
        Ok(())
    }

    /// Claims the oldest ready message of `queue`, if any.
    async fn claim_next(&self, queue: &str) -> Result<Option<Delivery>> {
        let _claim = self.inner.claim.lock().await;
        let cf = self.cf(CF_MESSAGES)?;
        let prefix = queue_prefix(queue);

        let iter = self
            .inner
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let mut message = decode(&value)?;
            if message.claimed {
                continue;
            }

            message.claimed = true;
            self.inner
                .db
                .put_cf(cf, &key, serde_json::to_vec(&message)?)?;
            return Ok(Some(Delivery {
                id: String::from_utf8_lossy(&key).into_owned(),
                payload: message.payload,
                redeliveries: message.redeliveries,
            }));
        }
        Ok(None)
    }

    fn keys_with_prefix(&self, cf: &ColumnFamily, prefix: &str) -> Result<Vec<Box<[u8]>>> {
        let mut keys = Vec::new();
        let iter = self
            .inner
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Payloads rejected without requeue.
    pub fn dead_letters(&self, queue: &str) -> Result<Vec<String>> {
        let cf = self.cf(CF_DEAD_LETTERS)?;
        let prefix = queue_prefix(queue);
        let mut payloads = Vec::new();
        for key in self.keys_with_prefix(cf, &prefix)? {
            if let Some(bytes) = self.inner.db.get_cf(cf, &key)? {
                payloads.push(decode(&bytes)?.payload);
            }
        }
        Ok(payloads)
    }
}

#[async_trait]
impl QueueBackend for RocksDbQueue {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    async fn connect(&self) -> Result<()> {
        self.cf(CF_MESSAGES)?;
        self.cf(CF_DEAD_LETTERS)?;
        Ok(())
    }

    async fn declare(&self, _queue: &str) -> Result<()> {
        // Queues are key prefixes; nothing to create.
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: String, options: PublishOptions) -> Result<()> {
        let cf = self.cf(CF_MESSAGES)?;
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::AcqRel);
        let message = StoredMessage {
            payload,
            redeliveries: 0,
            claimed: false,
        };
        // Persistent messages hit the WAL with an fsync before publish returns.
        let mut write_options = WriteOptions::default();
        write_options.set_sync(options.persistent);
        self.inner.db.put_cf_opt(
            cf,
            message_key(queue, sequence),
            serde_json::to_vec(&message)?,
            &write_options,
        )?;
        self.inner.published.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery> {
        loop {
            let published = self.inner.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            if let Some(delivery) = self.claim_next(queue).await? {
                return Ok(delivery);
            }

            tokio::select! {
                _ = published => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn ack(&self, _queue: &str, delivery: &Delivery) -> Result<()> {
        let cf = self.cf(CF_MESSAGES)?;
        self.inner.db.delete_cf(cf, delivery.id.as_bytes())?;
        Ok(())
    }

    async fn nack(&self, _queue: &str, delivery: &Delivery, requeue: bool) -> Result<()> {
        let cf = self.cf(CF_MESSAGES)?;
        let Some(bytes) = self.inner.db.get_cf(cf, delivery.id.as_bytes())? else {
            return Ok(());
        };
        let mut message = decode(&bytes)?;
        message.claimed = false;

        if requeue {
            message.redeliveries += 1;
            self.inner
                .db
                .put_cf(cf, delivery.id.as_bytes(), serde_json::to_vec(&message)?)?;
            self.inner.published.notify_waiters();
        } else {
            debug!(key = %delivery.id, "dead-lettering message");
            let dead_letters = self.cf(CF_DEAD_LETTERS)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(dead_letters, delivery.id.as_bytes(), serde_json::to_vec(&message)?);
            batch.delete_cf(cf, delivery.id.as_bytes());
            self.inner.db.write(batch)?;
        }
        Ok(())
    }

    async fn drained(&self, queue: &str) -> Result<bool> {
        let cf = self.cf(CF_MESSAGES)?;
        let prefix = queue_prefix(queue);
        let mut iter = self
            .inner
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(!key.starts_with(prefix.as_bytes()))
            }
            None => Ok(true),
        }
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        let _claim = self.inner.claim.lock().await;
        let prefix = queue_prefix(queue);
        let messages = self.cf(CF_MESSAGES)?;
        let mut batch = WriteBatch::default();
        for key in self.keys_with_prefix(messages, &prefix)? {
            batch.delete_cf(messages, key);
        }
        self.inner.db.write(batch)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.db.flush()?;
        Ok(())
    }
}
