//! Call pacing for the completion service.
//!
//! Every completion call first waits on a `CallScheduler` permit. The default
//! `MinIntervalGate` enforces a fixed minimum spacing between consecutive calls,
//! which keeps the service under its request-rate ceiling. The gate is global:
//! concurrent callers queue on the same lock, so a parallel pipeline would still
//! be spaced correctly.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Reference spacing between two completion calls.
pub const DEFAULT_CALL_INTERVAL: Duration = Duration::from_secs(10);

#[async_trait]
pub trait CallScheduler: Send + Sync {
    /// Waits until the next call may start. Not cancellable once awaited.
    async fn acquire(&self);
}

/// Minimum-interval gate: the first call passes immediately, each later call
/// starts no sooner than `interval` after the previous one started.
pub struct MinIntervalGate {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl MinIntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl CallScheduler for MinIntervalGate {
    async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                debug!(
                    "Pacing completion call, waiting {}ms",
                    (ready_at - Instant::now()).as_millis()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
