//! Cancellable timers delivering events into the engine task.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Handle to a scheduled timer.
///
/// Cancellation is infallible and idempotent, and also happens on drop so
/// that replacing a stored handle (or clearing a map of them) retires the
/// underlying timer.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    cancel: CancellationToken,
}

impl TimerHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Arm a single-shot timer that sends `event` after `delay`.
pub(crate) fn schedule<T: Send + 'static>(
    delay: Duration,
    tx: mpsc::UnboundedSender<T>,
    event: T,
) -> TimerHandle {
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = guard.cancelled() => {}
            _ = time::sleep(delay) => {
                let _ = tx.send(event);
            }
        }
    });
    TimerHandle { cancel }
}

/// Arm a periodic timer sending `make()` every `period`, first fire after
/// one full period.
pub(crate) fn schedule_interval<T, F>(
    period: Duration,
    tx: mpsc::UnboundedSender<T>,
    make: F,
) -> TimerHandle
where
    T: Send + 'static,
    F: Fn() -> T + Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = guard.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(make()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    TimerHandle { cancel }
}
