use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Emits task numbers `1..=count` at a fixed cadence, the first one
/// immediately.
///
/// The scheduler stops itself after the last tick or after a failed tick.
/// [`Scheduler::stop`] can end it early; once it returns no further tick runs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    count: u32,
    stopped: CancellationToken,
    // Held for the duration of a tick so `stop` can wait one out.
    in_tick: Arc<Mutex<()>>,
}

impl Scheduler {
    /// A schedule of `count` ticks, `interval` apart (at least 1 ms).
    pub fn new(interval: Duration, count: u32) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            count,
            stopped: CancellationToken::new(),
            in_tick: Arc::new(Mutex::new(())),
        }
    }

    /// Spawns the ticking loop. The handle yields the number of ticks that
    /// ran, or the error that aborted the schedule.
    pub fn start<F, Fut>(&self, mut on_tick: F) -> JoinHandle<Result<u32>>
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let interval = self.interval;
        let count = self.count;
        let stopped = self.stopped.clone();
        let in_tick = self.in_tick.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut emitted = 0;

            while emitted < count {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let _tick = in_tick.lock().await;
                if stopped.is_cancelled() {
                    break;
                }
                let task_number = emitted + 1;
                // A stop abandons the tick in flight.
                let result = tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    result = on_tick(task_number) => result,
                };
                if let Err(e) = result {
                    stopped.cancel();
                    return Err(e);
                }
                emitted = task_number;
            }

            stopped.cancel();
            debug!(emitted, "scheduler finished");
            Ok(emitted)
        })
    }

    /// Ends the schedule. A tick still running is dropped, and once this
    /// returns no tick runs again.
    pub async fn stop(&self) {
        self.stopped.cancel();
        let _idle = self.in_tick.lock().await;
    }

    /// True after [`Scheduler::stop`], a failed tick or the last tick.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    fn recorder() -> (
        Arc<StdMutex<Vec<(u32, Instant)>>>,
        impl FnMut(u32) -> std::future::Ready<Result<()>> + Send + 'static,
    ) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let on_tick = move |n: u32| {
            sink.lock().unwrap().push((n, Instant::now()));
            std::future::ready(Ok(()))
        };
        (seen, on_tick)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_count_ticks_first_immediately() {
        let (seen, on_tick) = recorder();
        let scheduler = Scheduler::new(Duration::from_millis(200), 4);
        let started = Instant::now();

        let emitted = scheduler.start(on_tick).await.unwrap().unwrap();

        assert_eq!(emitted, 4);
        assert!(scheduler.is_stopped());
        let seen = seen.lock().unwrap();
        let numbers: Vec<u32> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        for (i, (_, at)) in seen.iter().enumerate() {
            assert_eq!(*at - started, Duration::from_millis(200) * i as u32);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_ticks() {
        let (seen, on_tick) = recorder();
        let scheduler = Scheduler::new(Duration::from_millis(100), 10);
        let handle = scheduler.start(on_tick);

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;
        let after_stop = seen.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(handle.await.unwrap().unwrap(), 2);
        assert_eq!(after_stop, 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_aborts_schedule() {
        let scheduler = Scheduler::new(Duration::from_millis(50), 5);
        let handle = scheduler.start(|n| async move {
            if n == 2 {
                Err(PipelineError::Queue("publish failed".to_string()))
            } else {
                Ok(())
            }
        });

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Queue(_))));
        assert!(scheduler.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_a_stalled_tick() {
        let scheduler = Scheduler::new(Duration::from_millis(100), 3);
        let handle = scheduler.start(|n| async move {
            if n == 2 {
                std::future::pending::<()>().await;
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .expect("stop waited on a tick that never finishes");

        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_count_emits_nothing() {
        let (seen, on_tick) = recorder();
        let scheduler = Scheduler::new(Duration::from_millis(50), 0);

        assert_eq!(scheduler.start(on_tick).await.unwrap().unwrap(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
