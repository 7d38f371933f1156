// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Generic bounded-retry combinator.
//!
//! Used uniformly by the swap engine, the settlement executor, and the
//! balance poller: a fixed number of attempts with a fixed delay between
//! them and a predicate deciding which errors are worth retrying.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// A fixed retry budget: at most `max_attempts` tries with `delay` between
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_millis(max_attempts: u32, delay_ms: u64) -> Self {
        Self::new(max_attempts, Duration::from_millis(delay_ms))
    }
}

/// Run `op` until it succeeds, the budget is exhausted, or it fails with a
/// non-retryable error. The last error is returned as-is; intermediate
/// failures are logged at debug level only.
pub async fn bounded<T, E, F, Fut>(
    policy: RetryPolicy,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && retryable(&e) => {
                debug!(attempt, max_attempts, error = %e, "retrying after failure");
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("fails {0}")]
    struct Flaky(u32);

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result: Result<u32, Flaky> = bounded(
            RetryPolicy::from_millis(3, 1_000),
            |_| true,
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result: Result<u32, Flaky> = bounded(
            RetryPolicy::from_millis(3, 10),
            |_| true,
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(Flaky(n))
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err().0, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result: Result<u32, Flaky> = bounded(
            RetryPolicy::from_millis(5, 10),
            |_| true,
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(Flaky(n))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let result: Result<u32, Flaky> = bounded(
            RetryPolicy::from_millis(5, 10),
            |e: &Flaky| e.0 != 1,
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(Flaky(n))
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err().0, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
