// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Bounded balance-delta polling.
//!
//! Sleep, re-read, stop when the balance differs from the initial reading
//! or the retry budget is exhausted. There is no partial-success notion:
//! the caller either observes the delta within budget or receives a timeout
//! and decides what to do (retry, salvage, or fail). Used identically for
//! intermediate token accounts and deposit accounts.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tracing::warn;

use crate::gateway::rpc::BalanceSource;
use crate::retry::{self, RetryPolicy};

/// The expected balance delta was not observed within the retry budget.
#[derive(Debug, thiserror::Error)]
#[error("balance of {account} did not change from {initial} within {attempts} polls")]
pub struct PollTimeout {
    pub account: Pubkey,
    pub initial: u64,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
enum PollAttemptError {
    #[error("balance unchanged")]
    Unchanged,
    #[error("balance read failed: {0}")]
    Read(String),
}

/// Poll `account` until its balance differs from `initial_balance`.
/// Transient read failures consume an attempt and are logged, not
/// surfaced.
pub async fn poll_for_change(
    source: Arc<dyn BalanceSource>,
    account: &Pubkey,
    initial_balance: u64,
    retry_delay: Duration,
    max_retry_count: u32,
) -> Result<u64, PollTimeout> {
    tokio::time::sleep(retry_delay).await;

    let watched = *account;
    let result = retry::bounded(
        RetryPolicy::new(max_retry_count, retry_delay),
        |_: &PollAttemptError| true,
        move || {
            let source = Arc::clone(&source);
            async move {
                match source.token_balance(&watched).await {
                    Ok(balance) if balance != initial_balance => Ok(balance),
                    Ok(_) => Err(PollAttemptError::Unchanged),
                    Err(e) => {
                        warn!(account = %watched, error = %e, "balance poll read failed");
                        Err(PollAttemptError::Read(e.to_string()))
                    }
                }
            }
        },
    )
    .await;

    result.map_err(|_| PollTimeout {
        account: watched,
        initial: initial_balance,
        attempts: max_retry_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Balance source returning a scripted sequence of readings.
    struct ScriptedBalances {
        readings: Vec<u64>,
        calls: AtomicU32,
    }

    impl ScriptedBalances {
        fn new(readings: Vec<u64>) -> Self {
            Self {
                readings,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BalanceSource for ScriptedBalances {
        async fn token_balance(&self, _account: &Pubkey) -> Result<u64, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(*self.readings.get(n).unwrap_or_else(|| {
                self.readings.last().expect("non-empty readings")
            }))
        }

        async fn minimum_rent(&self) -> Result<u64, GatewayError> {
            Ok(2_039_280)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn observes_delta_within_budget() {
        let source = Arc::new(ScriptedBalances::new(vec![100, 100, 350]));
        let account = Pubkey::new_unique();
        let balance = poll_for_change(source, &account, 100, Duration::from_millis(500), 5)
            .await
            .unwrap();
        assert_eq!(balance, 350);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_balance_never_moves() {
        let source = Arc::new(ScriptedBalances::new(vec![100]));
        let account = Pubkey::new_unique();
        let err = poll_for_change(
            source.clone(),
            &account,
            100,
            Duration::from_millis(500),
            4,
        )
        .await
        .unwrap_err();
        assert_eq!(err.initial, 100);
        assert_eq!(err.attempts, 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn decreasing_balance_also_counts_as_change() {
        let source = Arc::new(ScriptedBalances::new(vec![100, 40]));
        let account = Pubkey::new_unique();
        let balance = poll_for_change(source, &account, 100, Duration::from_millis(500), 5)
            .await
            .unwrap();
        assert_eq!(balance, 40);
    }
}
