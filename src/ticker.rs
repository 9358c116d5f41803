use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Repeating timer that runs a callback every `period` until cancelled or
/// until the callback returns `ControlFlow::Break`.
///
/// - The first call happens one full period after spawning.
/// - Calls never overlap: the callback runs to completion before the next
///   timer wait starts.
/// - `cancel()` is idempotent and safe after the schedule already ended.
/// - Dropping the ticker cancels it.
#[derive(Debug)]
pub struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn the schedule on the current tokio runtime.
    pub fn spawn<F>(period: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }
                if callback().is_break() {
                    break;
                }
            }
            debug!(?period, "ticker stopped");
        });

        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the schedule has ended, by cancellation or by the callback.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let t = Ticker::spawn(Duration::from_millis(300), move || {
            c.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        time::sleep(Duration::from_millis(299)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        t.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn break_ends_schedule() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let t = Ticker::spawn(Duration::from_millis(100), move || {
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(t.is_finished());
        // Cancelling an already-finished ticker is harmless.
        t.cancel();
        t.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_stops_calls() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let t = Ticker::spawn(Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        time::sleep(Duration::from_millis(250)).await;
        t.cancel();
        t.cancel();
        assert!(t.is_cancelled());
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(t.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let t = Ticker::spawn(Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });
        drop(t);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
