//! Repeating background task.
//!
//! A [`RepeatingTask`] fires a blocking closure first after `delay` and then
//! every `period`. A zero period fires back to back, yielding to the runtime
//! between firings. Each firing runs on the blocking pool, so broker calls
//! never stall the reactor, and firings of one task never overlap.
//!
//! # Graceful Shutdown
//!
//! [`RepeatingTask::stop`] cancels the schedule and resolves once the loop has
//! exited. A firing already in progress is allowed to finish first. Dropping
//! the task without stopping it cancels the schedule but does not wait.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle to a running repeating schedule.
#[derive(Debug)]
pub struct RepeatingTask {
    name: &'static str,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Spawn the schedule on the current Tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn<F>(name: &'static str, delay: Duration, period: Duration, tick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run(
            name,
            delay,
            period,
            Arc::new(tick),
            cancel_token.clone(),
        ));
        Self {
            name,
            cancel_token,
            handle,
        }
    }

    /// Task name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the schedule and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Err(e) = (&mut self.handle).await {
            error!(
                target: "probe.task",
                task = self.name,
                error = %e,
                "Repeating task ended abnormally"
            );
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run<F>(
    name: &'static str,
    delay: Duration,
    period: Duration,
    tick: Arc<F>,
    cancel_token: CancellationToken,
) where
    F: Fn() + Send + Sync + 'static,
{
    debug!(
        target: "probe.task",
        task = name,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
        "Starting repeating task"
    );

    let first = Instant::now() + delay;

    if period.is_zero() {
        tokio::select! {
            () = tokio::time::sleep_until(first) => {}
            () = cancel_token.cancelled() => {
                info!(target: "probe.task", task = name, "Repeating task cancelled before first run");
                return;
            }
        }
        while !cancel_token.is_cancelled() {
            fire(name, &tick).await;
            tokio::task::yield_now().await;
        }
    } else {
        let mut interval = tokio::time::interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => fire(name, &tick).await,
            }
        }
    }

    debug!(target: "probe.task", task = name, "Repeating task stopped");
}

async fn fire<F>(name: &'static str, tick: &Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let tick = Arc::clone(tick);
    if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
        error!(
            target: "probe.task",
            task = name,
            error = %e,
            "Repeating task run panicked"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_fires_immediately_then_periodically() {
        let (count, tick) = counter();
        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::from_millis(20), tick);

        tokio::time::sleep(Duration::from_millis(150)).await;
        task.stop().await;

        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_initial_delay_is_honoured() {
        let (count, tick) = counter();
        let task = RepeatingTask::spawn(
            "test",
            Duration::from_millis(500),
            Duration::from_millis(10),
            tick,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        task.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_firing_after_stop() {
        let (count, tick) = counter();
        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::from_millis(5), tick);

        tokio::time::sleep(Duration::from_millis(30)).await;
        task.stop().await;
        let stopped_at = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_zero_period_runs_back_to_back() {
        let (count, tick) = counter();
        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::ZERO, tick);

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;

        assert!(count.load(Ordering::SeqCst) > 10);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_run() {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::from_secs(60), move || {
            s.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
        });

        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        task.stop().await;

        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_panicking_run_does_not_end_schedule() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::from_millis(10), move || {
            if inner.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails");
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop().await;

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_schedule() {
        let (count, tick) = counter();
        let task = RepeatingTask::spawn("test", Duration::ZERO, Duration::from_millis(5), tick);
        assert_eq!(task.name(), "test");

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(task);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
