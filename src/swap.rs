// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Swap execution over the exchange aggregator.
//!
//! Two modes of operation:
//!
//! - [`SwapEngine::execute`] runs a planned swap, re-quoting and retrying
//!   when the chain rejects the route for slippage. Every attempt gets a
//!   fresh quote so a moved market is priced in rather than re-submitted.
//! - [`SwapEngine::salvage`] is the recovery path: swap whatever actually
//!   sits in the source account (bounded by what the purchase intended to
//!   spend) with a widened slippage tolerance, then verify the output
//!   really landed at the destination.

use std::sync::Arc;

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::PurchaseConfig;
use crate::error::{SettlementError, SwapError};
use crate::gateway::{BalanceSource, QuoteRequest, SwapRoutes};
use crate::models::{SettlementReceipt, SwapMode, SwapQuote};
use crate::poller;
use crate::retry::{self, RetryPolicy};
use crate::settlement::SettlementExecutor;

/// Hard ceiling on the widened salvage slippage tolerance (10%).
const SALVAGE_SLIPPAGE_CAP_BPS: u16 = 1_000;

/// Aggregator program error code for a slippage-tolerance violation.
const SLIPPAGE_PROGRAM_ERROR: &str = "0x1771";

/// One planned swap: the quote parameters, instructions that must run
/// before the route (e.g. creating the destination token account),
/// instructions appended after it (e.g. moving the output onward in the
/// same transaction), and an optional account the aggregator should
/// forward the output to directly.
#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub request: QuoteRequest,
    pub prelude: Vec<Instruction>,
    pub postlude: Vec<Instruction>,
    pub forward_output_to: Option<Pubkey>,
}

/// Result of a completed swap.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub quote: SwapQuote,
    pub receipt: SettlementReceipt,
}

/// Result of a salvage run: what was actually delivered to the destination.
#[derive(Debug, Clone)]
pub struct SalvageOutcome {
    pub recovered_output: u64,
    pub receipt: SettlementReceipt,
}

/// How much of the source account a salvage may consume: everything above
/// the rent reserve, capped at what the original purchase meant to spend.
/// Funds beyond the intended amount belong to the user and stay put.
pub fn salvage_bound(current_balance: u64, rent_reserve: u64, intended_amount: u64) -> u64 {
    current_balance.saturating_sub(rent_reserve).min(intended_amount)
}

fn widened_slippage(configured_bps: u16) -> u16 {
    configured_bps
        .saturating_mul(10)
        .min(SALVAGE_SLIPPAGE_CAP_BPS)
}

/// Worst-case acceptable output for `output_amount` at `slippage_bps`.
/// Widened via u128 so large base-unit outputs cannot overflow.
fn slippage_floor(output_amount: u64, slippage_bps: u16) -> u64 {
    let discount = u128::from(output_amount) * u128::from(slippage_bps) / 10_000;
    output_amount.saturating_sub(discount as u64)
}

/// Whether a settlement failure is the chain rejecting the route for
/// slippage, as opposed to an infrastructure fault.
fn is_slippage_rejection(err: &SettlementError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("slippage") || msg.contains(SLIPPAGE_PROGRAM_ERROR)
}

pub struct SwapEngine {
    routes: Arc<dyn SwapRoutes>,
    settlement: Arc<SettlementExecutor>,
    balances: Arc<dyn BalanceSource>,
    swap_policy: RetryPolicy,
    poll_delay: std::time::Duration,
    max_poll_count: u32,
}

impl SwapEngine {
    pub fn new(
        routes: Arc<dyn SwapRoutes>,
        settlement: Arc<SettlementExecutor>,
        balances: Arc<dyn BalanceSource>,
        config: &PurchaseConfig,
    ) -> Self {
        Self {
            routes,
            settlement,
            balances,
            swap_policy: RetryPolicy::from_millis(config.swap_retry_count, config.poll_delay_ms),
            poll_delay: std::time::Duration::from_millis(config.poll_delay_ms),
            max_poll_count: config.max_retry_count,
        }
    }

    /// Execute `plan` as one atomic transaction. Slippage rejections are
    /// retried with a fresh quote up to the configured budget; all other
    /// failures surface immediately.
    pub async fn execute(&self, plan: &SwapPlan) -> Result<SwapOutcome, SwapError> {
        let routes = Arc::clone(&self.routes);
        let settlement = Arc::clone(&self.settlement);
        let request = plan.request;
        let prelude = plan.prelude.clone();
        let postlude = plan.postlude.clone();
        let forward = plan.forward_output_to;

        retry::bounded(
            self.swap_policy,
            |e: &SwapError| matches!(e, SwapError::SlippageExceeded),
            move || {
                let routes = Arc::clone(&routes);
                let settlement = Arc::clone(&settlement);
                let prelude = prelude.clone();
                let postlude = postlude.clone();
                async move {
                    let quote = routes.quote(request).await?;
                    let user = settlement.fee_payer_pubkey();
                    let swap_ixs = routes
                        .swap_instructions(&quote, &user, forward.as_ref())
                        .await?;

                    let mut instructions = prelude;
                    instructions.extend(swap_ixs);
                    instructions.extend(postlude);

                    match settlement.execute(instructions, quote.output_amount).await {
                        Ok(receipt) => Ok(SwapOutcome { quote, receipt }),
                        Err(e) if is_slippage_rejection(&e) => {
                            warn!(error = %e, "route rejected for slippage, will re-quote");
                            Err(SwapError::SlippageExceeded)
                        }
                        Err(e) => Err(SwapError::Settlement(e)),
                    }
                }
            },
        )
        .await
    }

    /// Swap whatever is recoverable from `source_token_account` into
    /// `output_token`, forwarding the result to `destination_token_account`,
    /// and verify the destination balance actually moved.
    ///
    /// Uses a widened slippage tolerance and exactly one attempt: salvage
    /// runs after the normal retry budget is already spent, and a second
    /// partial swap would leave the funds in a worse state than reporting
    /// the shortfall.
    pub async fn salvage(
        &self,
        source_token_account: &Pubkey,
        input_token: &Pubkey,
        output_token: &Pubkey,
        intended_source_amount: u64,
        destination_token_account: &Pubkey,
        configured_slippage_bps: u16,
    ) -> Result<SalvageOutcome, SwapError> {
        let available = self.balances.token_balance(source_token_account).await?;
        let rent_reserve = self.balances.minimum_rent().await?;
        let amount = salvage_bound(available, rent_reserve, intended_source_amount);
        if amount == 0 {
            return Err(SwapError::InsufficientInputBalance {
                available,
                required: intended_source_amount,
            });
        }

        let slippage_bps = widened_slippage(configured_slippage_bps);
        info!(
            amount,
            available, intended_source_amount, slippage_bps, "starting salvage swap"
        );

        let quote = self
            .routes
            .quote(QuoteRequest {
                input_token: *input_token,
                output_token: *output_token,
                amount,
                mode: SwapMode::ExactIn,
                slippage_bps,
            })
            .await?;

        let destination_before = self
            .balances
            .token_balance(destination_token_account)
            .await?;

        let user = self.settlement.fee_payer_pubkey();
        let instructions = self
            .routes
            .swap_instructions(&quote, &user, Some(destination_token_account))
            .await?;
        let receipt = self
            .settlement
            .execute(instructions, quote.output_amount)
            .await?;

        // Worst-case acceptable output given the widened tolerance.
        let expected_floor = slippage_floor(quote.output_amount, slippage_bps);

        let destination_after = poller::poll_for_change(
            Arc::clone(&self.balances),
            destination_token_account,
            destination_before,
            self.poll_delay,
            self.max_poll_count,
        )
        .await
        .map_err(|_| SwapError::InsufficientFundsAfterSalvage {
            expected: expected_floor,
            actual: 0,
        })?;

        let recovered = destination_after.saturating_sub(destination_before);
        if recovered < expected_floor {
            return Err(SwapError::InsufficientFundsAfterSalvage {
                expected: expected_floor,
                actual: recovered,
            });
        }

        info!(recovered, signature = %receipt.signature, "salvage swap delivered");
        Ok(SalvageOutcome {
            recovered_output: recovered,
            receipt,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::Keypair;
    use solana_sdk::transaction::Transaction;

    use crate::error::GatewayError;
    use crate::gateway::ExecutionEndpoint;

    fn quote_for(request: &QuoteRequest, output_amount: u64) -> SwapQuote {
        SwapQuote {
            input_token: request.input_token,
            output_token: request.output_token,
            input_amount: request.amount,
            output_amount,
            slippage_bps: request.slippage_bps,
            route: serde_json::json!({"route": "test"}),
        }
    }

    struct ScriptedRoutes {
        quotes_served: AtomicU32,
        output_amount: u64,
    }

    impl ScriptedRoutes {
        fn new(output_amount: u64) -> Self {
            Self {
                quotes_served: AtomicU32::new(0),
                output_amount,
            }
        }
    }

    #[async_trait]
    impl SwapRoutes for ScriptedRoutes {
        async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, SwapError> {
            self.quotes_served.fetch_add(1, Ordering::SeqCst);
            Ok(quote_for(&request, self.output_amount))
        }

        async fn swap_instructions(
            &self,
            _quote: &SwapQuote,
            _user: &Pubkey,
            _destination_token_account: Option<&Pubkey>,
        ) -> Result<Vec<Instruction>, SwapError> {
            Ok(vec![])
        }
    }

    /// Rejects the first `slippage_failures` submissions with the slippage
    /// program error, then accepts.
    struct SlippageEndpoint {
        slippage_failures: AtomicU32,
    }

    #[async_trait]
    impl ExecutionEndpoint for SlippageEndpoint {
        async fn submit(&self, _tx: &Transaction) -> Result<String, GatewayError> {
            let remaining = self.slippage_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.slippage_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::Rpc(
                    "custom program error: 0x1771".to_string(),
                ));
            }
            Ok("sig-ok".to_string())
        }

        async fn is_confirmed(&self, _signature: &str) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn latest_blockhash(&self) -> Result<Hash, GatewayError> {
            Ok(Hash::default())
        }
    }

    struct StaticBalances {
        balance: u64,
        rent: u64,
    }

    #[async_trait]
    impl BalanceSource for StaticBalances {
        async fn token_balance(&self, _account: &Pubkey) -> Result<u64, GatewayError> {
            Ok(self.balance)
        }

        async fn minimum_rent(&self) -> Result<u64, GatewayError> {
            Ok(self.rent)
        }
    }

    fn test_request() -> QuoteRequest {
        QuoteRequest {
            input_token: Pubkey::new_unique(),
            output_token: Pubkey::new_unique(),
            amount: 1_000_000,
            mode: SwapMode::ExactOut,
            slippage_bps: 50,
        }
    }

    fn engine_with(
        routes: Arc<ScriptedRoutes>,
        endpoint: Arc<SlippageEndpoint>,
        balances: Arc<StaticBalances>,
    ) -> SwapEngine {
        let settlement = Arc::new(
            SettlementExecutor::new(endpoint, Arc::new(Keypair::new())).with_policies(
                RetryPolicy::from_millis(1, 1),
                RetryPolicy::from_millis(3, 1),
            ),
        );
        let config = PurchaseConfig {
            swap_retry_count: 3,
            poll_delay_ms: 1,
            max_retry_count: 3,
            ..PurchaseConfig::default()
        };
        SwapEngine::new(routes, settlement, balances, &config)
    }

    #[test]
    fn salvage_bound_caps_at_intended_amount() {
        assert_eq!(salvage_bound(10_000, 500, 4_000), 4_000);
        assert_eq!(salvage_bound(10_000, 500, 20_000), 9_500);
        assert_eq!(salvage_bound(400, 500, 4_000), 0);
        assert_eq!(salvage_bound(0, 0, 0), 0);
    }

    #[test]
    fn widened_slippage_is_capped() {
        assert_eq!(widened_slippage(50), 500);
        assert_eq!(widened_slippage(150), 1_000);
        assert_eq!(widened_slippage(0), 0);
    }

    #[test]
    fn slippage_floor_handles_extreme_outputs() {
        assert_eq!(slippage_floor(10_000, 50), 9_950);
        assert_eq!(slippage_floor(0, 500), 0);
        // No overflow near u64::MAX.
        assert_eq!(
            slippage_floor(u64::MAX, 1_000),
            u64::MAX - u64::MAX / 10
        );
        assert_eq!(slippage_floor(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn slippage_rejection_is_classified_from_message() {
        let err = SettlementError::Submission("custom program error: 0x1771".to_string());
        assert!(is_slippage_rejection(&err));
        let err = SettlementError::Submission("Slippage tolerance exceeded".to_string());
        assert!(is_slippage_rejection(&err));
        let err = SettlementError::Submission("blockhash not found".to_string());
        assert!(!is_slippage_rejection(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn slippage_failure_triggers_fresh_quote() {
        let routes = Arc::new(ScriptedRoutes::new(990_000));
        let endpoint = Arc::new(SlippageEndpoint {
            slippage_failures: AtomicU32::new(1),
        });
        let balances = Arc::new(StaticBalances {
            balance: 0,
            rent: 0,
        });
        let engine = engine_with(Arc::clone(&routes), endpoint, balances);

        let plan = SwapPlan {
            request: test_request(),
            prelude: vec![],
            postlude: vec![],
            forward_output_to: None,
        };
        let outcome = engine.execute(&plan).await.expect("swap succeeds");

        assert_eq!(outcome.receipt.signature, "sig-ok");
        // First quote failed on-chain, second attempt re-quoted.
        assert_eq!(routes.quotes_served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slippage_budget_exhaustion_surfaces() {
        let routes = Arc::new(ScriptedRoutes::new(990_000));
        let endpoint = Arc::new(SlippageEndpoint {
            slippage_failures: AtomicU32::new(10),
        });
        let balances = Arc::new(StaticBalances {
            balance: 0,
            rent: 0,
        });
        let engine = engine_with(Arc::clone(&routes), endpoint, balances);

        let plan = SwapPlan {
            request: test_request(),
            prelude: vec![],
            postlude: vec![],
            forward_output_to: None,
        };
        let err = engine.execute(&plan).await.expect_err("budget exhausted");

        assert!(matches!(err, SwapError::SlippageExceeded));
        assert_eq!(routes.quotes_served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn salvage_refuses_when_nothing_recoverable() {
        let routes = Arc::new(ScriptedRoutes::new(0));
        let endpoint = Arc::new(SlippageEndpoint {
            slippage_failures: AtomicU32::new(0),
        });
        let balances = Arc::new(StaticBalances {
            balance: 100,
            rent: 500,
        });
        let engine = engine_with(routes, endpoint, balances);

        let err = engine
            .salvage(
                &Pubkey::new_unique(),
                &Pubkey::new_unique(),
                &Pubkey::new_unique(),
                1_000_000,
                &Pubkey::new_unique(),
                50,
            )
            .await
            .expect_err("nothing to salvage");

        assert!(matches!(
            err,
            SwapError::InsufficientInputBalance { available: 100, .. }
        ));
    }
}
