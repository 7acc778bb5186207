//! Timers for periodic sweeps and delayed one-shot work
//!
//! Everything here runs on tokio's clock, so tests can drive it with a paused
//! runtime instead of waiting on the wall clock.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fixed-period ticker that can be restarted from scratch
pub struct Ticker {
    period: Duration,
    interval: Interval,
}

impl Ticker {
    /// First tick fires one full period after creation
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: Self::build(period),
        }
    }

    fn build(period: Duration) -> Interval {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drop the current schedule; the next tick is one period from now
    pub fn restart(&mut self) {
        self.interval = Self::build(self.period);
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Run `task` once after `delay`, unless `token` is cancelled first
pub fn spawn_delayed<F>(delay: Duration, token: CancellationToken, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => task.await,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_period() {
        let mut ticker = Ticker::new(Duration::from_secs(2));
        let start = Instant::now();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_restart_resets_phase() {
        let mut ticker = Ticker::new(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        ticker.restart();

        let start = Instant::now();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_task_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = spawn_delayed(Duration::from_millis(500), CancellationToken::new(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        handle.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let token = CancellationToken::new();
        let handle = spawn_delayed(Duration::from_millis(500), token.clone(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        handle.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
