use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A single run deadline. [`Deadline::expired`] resolves once the budget has
/// elapsed, or never if the deadline was disarmed first.
#[derive(Debug, Clone)]
pub struct Deadline {
    budget: Duration,
    expires_at: Instant,
    disarmed: CancellationToken,
}

impl Deadline {
    /// Starts the clock now. The deadline fires `budget` from this call.
    pub fn arm(budget: Duration) -> Self {
        Self {
            budget,
            expires_at: Instant::now() + budget,
            disarmed: CancellationToken::new(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Resolves to the budget once it has run out. Cancel-safe, so it can sit
    /// in a `select!` next to the work it bounds.
    pub async fn expired(&self) -> Duration {
        tokio::select! {
            _ = tokio::time::sleep_until(self.expires_at) => self.budget,
            _ = self.disarmed.cancelled() => std::future::pending::<Duration>().await,
        }
    }

    /// Stops the deadline from firing. Idempotent.
    pub fn disarm(&self) {
        self.disarmed.cancel();
    }

    pub fn is_disarmed(&self) -> bool {
        self.disarmed.is_cancelled()
    }
}
