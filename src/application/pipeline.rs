use super::deadline::Deadline;
use super::query::ValidatedQuery;
use super::scheduler::Scheduler;
use super::session::SessionGuard;
use crate::config::PipelineConfig;
use crate::domain::balance::BalanceAggregator;
use crate::domain::block::{Block, block_number_hex};
use crate::domain::outcome::{BalanceReport, ErrorEvent, PipelineOutcome, PipelineState};
use crate::domain::ports::{
    Delivery, PublishOptions, QueueBackend, SharedBlockFetcher, SharedQueueBackend,
};
use crate::domain::task::{DOWNLOAD_QUEUE, DownloadTask, PROCESS_QUEUE, ProcessTask, Stamped};
use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a single purge, close or drain check may take once a run has
/// settled.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// What one run is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    /// How many blocks to download, counting back from `last_block`.
    pub blocks_amount: u32,
    /// Decimal number of the block the range ends before.
    pub last_block: u64,
}

impl From<&ValidatedQuery> for RunRequest {
    fn from(query: &ValidatedQuery) -> Self {
        Self {
            blocks_amount: query.blocks_amount,
            last_block: query.last_block_number,
        }
    }
}

enum Settled {
    Completed { loading: Duration, processing: Duration },
    Expired(Duration),
    Failed(PipelineError),
}

/// Drives a run through both queue stages against a deadline.
///
/// The orchestrator never looks at which engine it was given: the download
/// and process stages each talk to a [`QueueBackend`] (possibly the same one)
/// and blocks come from a [`crate::domain::ports::BlockFetcher`]. Each run gets
/// a fresh session key, so leftovers from earlier runs that an engine still
/// holds are recognised and discarded instead of being counted.
pub struct PipelineOrchestrator {
    download: SharedQueueBackend,
    process: SharedQueueBackend,
    fetcher: SharedBlockFetcher,
    config: PipelineConfig,
    state: watch::Sender<PipelineState>,
    errors: Option<mpsc::UnboundedSender<ErrorEvent>>,
}

impl PipelineOrchestrator {
    /// Uses one engine for both stages.
    pub fn new(queue: SharedQueueBackend, fetcher: SharedBlockFetcher, config: PipelineConfig) -> Self {
        Self::with_stage_queues(queue.clone(), queue, fetcher, config)
    }

    /// Gives each stage its own engine.
    ///
    /// # Arguments
    ///
    /// * `download` - carries [`DownloadTask`]s from the scheduler to the
    ///   fetcher
    /// * `process` - carries fetched blocks to the aggregator
    /// * `fetcher` - where block bodies come from
    /// * `config` - cadence, per-block budget and persistence
    pub fn with_stage_queues(
        download: SharedQueueBackend,
        process: SharedQueueBackend,
        fetcher: SharedBlockFetcher,
        config: PipelineConfig,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            download,
            process,
            fetcher,
            config,
            state,
            errors: None,
        }
    }

    /// Every fatal error is also sent here, whoever consumes the result.
    pub fn with_error_channel(mut self, errors: mpsc::UnboundedSender<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Follows state transitions. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// The state of the current or most recent run.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Runs the pipeline once. Both queues are purged and closed before this
    /// returns, whatever the outcome.
    pub async fn run(&self, request: RunRequest) -> PipelineOutcome {
        let guard = SessionGuard::begin();
        info!(
            session = %guard.active(),
            blocks = request.blocks_amount,
            last_block = request.last_block,
            backend = self.download.name(),
            "starting run"
        );

        let aggregator = Mutex::new(BalanceAggregator::new());
        let outcome = self.drive(&guard, request, &aggregator).await;

        self.cleanup().await;

        match &outcome {
            PipelineOutcome::Succeeded(report) => info!(
                transactions = report.amount_of_transactions,
                loading_time = report.loading_time,
                process_time = report.process_time,
                "run succeeded"
            ),
            PipelineOutcome::TimedOut { partial, budget } => warn!(
                transactions = partial.amount_of_transactions,
                budget_ms = budget.as_millis() as u64,
                "run timed out"
            ),
            PipelineOutcome::Failed(e) => {
                error!(error = %e, "run failed");
                self.report(&guard, e);
            }
        }
        self.transition(outcome.state());
        outcome
    }

    async fn drive(
        &self,
        guard: &SessionGuard,
        request: RunRequest,
        aggregator: &Mutex<BalanceAggregator>,
    ) -> PipelineOutcome {
        self.transition(PipelineState::Connecting);
        if let Err(e) = self.connect().await {
            return PipelineOutcome::Failed(e);
        }

        self.transition(PipelineState::Downloading);
        let deadline = Deadline::arm(self.config.deadline_for(request.blocks_amount));
        debug!(budget_ms = deadline.budget().as_millis() as u64, "deadline armed");
        let scheduler = Scheduler::new(self.config.request_interval, request.blocks_amount);
        let queue = self.download.clone();
        let options = self.publish_options();
        let session = *guard;
        let mut ticks = scheduler.start(move |task_number| {
            enqueue_download(queue.clone(), session, request, options, task_number)
        });

        let stages = async {
            tokio::try_join!(
                self.download_stage(guard, request),
                self.process_stage(guard, request, aggregator)
            )
        };
        let schedule_aborted = async {
            match (&mut ticks).await {
                Ok(Ok(_)) => std::future::pending::<PipelineError>().await,
                Ok(Err(e)) => e,
                Err(e) => PipelineError::Internal(format!("scheduler task failed: {}", e)),
            }
        };

        let settled = tokio::select! {
            biased;
            result = stages => match result {
                Ok((loading, processing)) => Settled::Completed { loading, processing },
                Err(e) => Settled::Failed(e),
            },
            e = schedule_aborted => Settled::Failed(e),
            budget = deadline.expired() => Settled::Expired(budget),
        };

        scheduler.stop().await;
        deadline.disarm();

        match settled {
            Settled::Completed {
                loading,
                processing,
            } => match lock(aggregator) {
                Ok(aggregator) => PipelineOutcome::Succeeded(BalanceReport::from_aggregator(
                    &aggregator,
                    loading,
                    processing,
                )),
                Err(e) => PipelineOutcome::Failed(e),
            },
            Settled::Expired(budget) => {
                // Stage timings are unknown for an unfinished run.
                let partial = lock(aggregator)
                    .map(|aggregator| {
                        BalanceReport::from_aggregator(&aggregator, Duration::ZERO, Duration::ZERO)
                    })
                    .unwrap_or_default();
                PipelineOutcome::TimedOut { partial, budget }
            }
            Settled::Failed(e) => PipelineOutcome::Failed(e),
        }
    }

    async fn connect(&self) -> Result<()> {
        for (backend, queue) in [(&self.download, DOWNLOAD_QUEUE), (&self.process, PROCESS_QUEUE)] {
            backend.connect().await.map_err(|e| match e {
                PipelineError::Connection(_) => e,
                other => PipelineError::Connection(format!(
                    "Error connecting to the {} server! {}",
                    backend.name(),
                    other
                )),
            })?;
            backend.declare(queue).await?;
        }
        Ok(())
    }

    async fn download_stage(&self, guard: &SessionGuard, request: RunRequest) -> Result<Duration> {
        let started = Instant::now();
        let mut forwarded = HashSet::new();

        while (forwarded.len() as u32) < request.blocks_amount {
            let delivery = self.download.receive(DOWNLOAD_QUEUE).await?;
            let Some(task) = admit::<DownloadTask>(
                self.download.as_ref(),
                DOWNLOAD_QUEUE,
                guard,
                &delivery,
                &forwarded,
            )
            .await?
            else {
                continue;
            };
            debug!(task = task.task_number, block = %task.block_number_hex, "download queue iteration");

            let block = match self.fetch(&task).await {
                Ok(block) => block,
                Err(e) => {
                    if let Err(nack) = self.download.nack(DOWNLOAD_QUEUE, &delivery, false).await {
                        warn!(error = %nack, "failed to reject download task");
                    }
                    return Err(e);
                }
            };

            let task_number = task.task_number;
            let process_task = task.into_process_task(block);
            self.process
                .publish(
                    PROCESS_QUEUE,
                    serde_json::to_string(&process_task)?,
                    self.publish_options(),
                )
                .await?;
            self.download.ack(DOWNLOAD_QUEUE, &delivery).await?;
            forwarded.insert(task_number);
        }

        let loading = started.elapsed();
        info!(loading_time = loading.as_secs_f64(), "all blocks downloaded");
        self.transition(PipelineState::Processing);
        Ok(loading)
    }

    async fn process_stage(
        &self,
        guard: &SessionGuard,
        request: RunRequest,
        aggregator: &Mutex<BalanceAggregator>,
    ) -> Result<Duration> {
        let started = Instant::now();
        let mut applied = HashSet::new();

        while (applied.len() as u32) < request.blocks_amount {
            let delivery = self.process.receive(PROCESS_QUEUE).await?;
            let Some(task) = admit::<ProcessTask>(
                self.process.as_ref(),
                PROCESS_QUEUE,
                guard,
                &delivery,
                &applied,
            )
            .await?
            else {
                continue;
            };
            debug!(task = task.task_number, "process queue iteration");

            if let Some(failure) = task.content.failure() {
                self.process.nack(PROCESS_QUEUE, &delivery, false).await?;
                return Err(PipelineError::fetch(&task.block_number_hex, failure));
            }

            lock(aggregator)?.apply_block(&task.content);
            self.process.ack(PROCESS_QUEUE, &delivery).await?;
            applied.insert(task.task_number);
        }

        Ok(started.elapsed())
    }

    async fn fetch(&self, task: &DownloadTask) -> Result<Block> {
        let block = self.fetcher.fetch_block(&task.block_number_hex).await?;
        match block.failure() {
            Some(failure) => Err(PipelineError::fetch(&task.block_number_hex, failure)),
            None => Ok(block),
        }
    }

    /// Purges and closes both queues. Problems are logged, never raised, so
    /// they cannot replace the run's outcome. Each engine call gets
    /// [`CLEANUP_TIMEOUT`]; one that hangs is abandoned.
    async fn cleanup(&self) {
        for (backend, queue) in [(&self.download, DOWNLOAD_QUEUE), (&self.process, PROCESS_QUEUE)] {
            match bounded("inspect", backend.drained(queue)).await {
                Ok(false) => debug!(queue, "purging queue with unsettled tasks"),
                Ok(true) => {}
                Err(e) => warn!(queue, error = %e, "could not inspect queue before purge"),
            }
            if let Err(e) = bounded("purge", backend.purge(queue)).await {
                warn!(queue, error = %e, "failed to purge queue");
            }
        }
        for backend in [&self.download, &self.process] {
            if let Err(e) = bounded("close", backend.close()).await {
                warn!(backend = backend.name(), error = %e, "failed to close queue backend");
            }
        }
    }

    fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            persistent: self.config.persistent,
        }
    }

    fn transition(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        info!(from = %previous, to = %next, "pipeline state");
    }

    fn report(&self, guard: &SessionGuard, error: &PipelineError) {
        if let Some(errors) = &self.errors {
            let event = ErrorEvent {
                session_key: guard.active(),
                message: error.to_string(),
            };
            if errors.send(event).is_err() {
                debug!("error channel closed");
            }
        }
    }
}

/// The scheduler's tick: stamp task `task_number` and put it on the download
/// queue.
async fn enqueue_download(
    queue: SharedQueueBackend,
    guard: SessionGuard,
    request: RunRequest,
    options: PublishOptions,
    task_number: u32,
) -> Result<()> {
    let block = block_number_hex(request.last_block, task_number).ok_or_else(|| {
        PipelineError::Validation(format!(
            "block {} before {} precedes the genesis block",
            task_number, request.last_block
        ))
    })?;
    let task = guard.tag(DownloadTask::new(task_number, block, request.blocks_amount));
    debug!(task = task_number, block = %task.block_number_hex, "enqueue download task");
    queue
        .publish(DOWNLOAD_QUEUE, serde_json::to_string(&task)?, options)
        .await
}

async fn bounded<T>(operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(CLEANUP_TIMEOUT, call)
        .await
        .map_err(|_| {
            PipelineError::Queue(format!(
                "{} did not finish within {} msec",
                operation,
                CLEANUP_TIMEOUT.as_millis()
            ))
        })?
}

fn lock(aggregator: &Mutex<BalanceAggregator>) -> Result<MutexGuard<'_, BalanceAggregator>> {
    aggregator
        .lock()
        .map_err(|_| PipelineError::Internal("balance aggregator lock poisoned".to_string()))
}

/// Decodes a delivery and decides whether it may touch this run. Undecodable
/// payloads are dead-lettered; stale and duplicate tasks are acknowledged and
/// skipped.
async fn admit<T>(
    queue: &dyn QueueBackend,
    name: &str,
    guard: &SessionGuard,
    delivery: &Delivery,
    seen: &HashSet<u32>,
) -> Result<Option<T>>
where
    T: DeserializeOwned + Stamped,
{
    let task: T = match serde_json::from_str(&delivery.payload) {
        Ok(task) => task,
        Err(e) => {
            warn!(queue = name, error = %e, "dead-lettering undecodable payload");
            queue.nack(name, delivery, false).await?;
            return Ok(None);
        }
    };

    if !guard.accept(&task) {
        debug!(
            queue = name,
            session = %task.session_key(),
            task = task.task_number(),
            "dropping task from another session"
        );
        queue.ack(name, delivery).await?;
        return Ok(None);
    }

    if seen.contains(&task.task_number()) {
        warn!(
            queue = name,
            task = task.task_number(),
            redeliveries = delivery.redeliveries,
            "skipping duplicate delivery"
        );
        queue.ack(name, delivery).await?;
        return Ok(None);
    }

    Ok(Some(task))
}
