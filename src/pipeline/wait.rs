//! Cancellable timed waits.
//!
//! Every pause in the pipeline (readiness polling, retry backoff) goes
//! through [`wait_or_cancel`], so a cancelled run leaves any wait at the
//! next tick instead of sleeping it out.

use crate::error::DocumentError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// The run was cancelled while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl From<Cancelled> for DocumentError {
    fn from(_: Cancelled) -> Self {
        DocumentError::Cancelled
    }
}

const TICK: Duration = Duration::from_secs(1);

/// Wait for `duration`, calling `on_tick` with the remaining time roughly
/// once per second. Returns `Err(Cancelled)` as soon as `cancel` fires.
pub async fn wait_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    mut on_tick: impl FnMut(Duration),
) -> Result<(), Cancelled> {
    let deadline = Instant::now() + duration;

    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        on_tick(remaining);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled),
            _ = time::sleep(remaining.min(TICK)) => {}
        }
    }
}

/// Drive `fut` to completion unless `cancel` fires first.
pub async fn run_or_cancel<F: Future>(
    fut: F,
    cancel: &CancellationToken,
) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second() {
        let cancel = CancellationToken::new();
        let mut ticks = Vec::new();
        let started = Instant::now();

        wait_or_cancel(Duration::from_secs(3), &cancel, |left| {
            ticks.push(left.as_secs_f64().round() as u64)
        })
        .await
        .expect("not cancelled");

        assert_eq!(ticks, vec![3, 2, 1]);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_long_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let out = wait_or_cancel(Duration::from_secs(600), &cancel, |_| {}).await;

        assert_eq!(out, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn zero_wait_returns_immediately() {
        let cancel = CancellationToken::new();
        let out = tokio_test::block_on(wait_or_cancel(Duration::ZERO, &cancel, |_| {
            panic!("no tick expected")
        }));
        assert_eq!(out, Ok(()));
    }

    #[tokio::test]
    async fn pre_cancelled_future_is_not_polled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = run_or_cancel(async { 7 }, &cancel).await;
        assert_eq!(out, Err(Cancelled));
    }
}
