// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Funding coordination: turning a payment method into confirmed stablecoin
//! in the user's deposit account.
//!
//! The card path is the long one: open a hosted on-ramp session, wait for
//! the processor to deliver the payment token into the intermediate wallet,
//! then swap it into stablecoin routed straight to the deposit account. A
//! durable recovery record brackets the window between "processor says paid"
//! and "stablecoin settled", so a crash in between is recoverable at the
//! next startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::PurchaseConfig;
use crate::error::{FundingError, SwapError, ValidationError};
use crate::gateway::{BalanceSource, QuoteRequest, SwapRoutes};
use crate::models::{
    base_to_minor, minor_to_base, now_epoch_ms, FundingStatus, RecoveryRecord, SettlementReceipt,
    SwapMode, Vendor, WalletContext,
};
use crate::poller;
use crate::providers::{await_terminal, OnrampOutcome, OnrampProvider};
use crate::session::{SessionHandle, SessionRegistry};
use crate::settlement::SettlementExecutor;
use crate::storage::RecoveryStore;
use crate::swap::{SwapEngine, SwapPlan};

/// Stablecoin delivered to the deposit account by a funding run.
#[derive(Debug, Clone)]
pub struct FundedBalance {
    /// Amount confirmed in the deposit account, in minor units.
    pub confirmed_minor: u64,
    pub receipt: SettlementReceipt,
}

pub struct FundingCoordinator {
    providers: HashMap<Vendor, Arc<dyn OnrampProvider>>,
    routes: Arc<dyn SwapRoutes>,
    balances: Arc<dyn BalanceSource>,
    settlement: Arc<SettlementExecutor>,
    swap: Arc<SwapEngine>,
    store: Arc<RecoveryStore>,
    sessions: Arc<SessionRegistry>,
    wallet: WalletContext,
    config: PurchaseConfig,
}

impl FundingCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: HashMap<Vendor, Arc<dyn OnrampProvider>>,
        routes: Arc<dyn SwapRoutes>,
        balances: Arc<dyn BalanceSource>,
        settlement: Arc<SettlementExecutor>,
        swap: Arc<SwapEngine>,
        store: Arc<RecoveryStore>,
        sessions: Arc<SessionRegistry>,
        wallet: WalletContext,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            providers,
            routes,
            balances,
            settlement,
            swap,
            store,
            sessions,
            wallet,
            config,
        }
    }

    fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.config.poll_delay_ms)
    }

    /// Fund `amount_minor` of stablecoin via a fiat card payment with the
    /// given vendor.
    ///
    /// Ordering matters here: the recovery record is written only after the
    /// processor reports fulfillment, so a user who closes the payment UI
    /// leaves nothing behind. From that point on the record stays armed
    /// until the funds verifiably reach the deposit account.
    pub async fn fund_with_card(
        &self,
        amount_minor: u64,
        vendor: Vendor,
        handle: &SessionHandle,
    ) -> Result<FundedBalance, FundingError> {
        let provider = self
            .providers
            .get(&vendor)
            .ok_or(ValidationError::UnsupportedVendor(vendor))?;

        let initial_payment_balance = self
            .balances
            .token_balance(&self.wallet.root_payment_account)
            .await?;

        self.sessions.set_status(handle.generation, FundingStatus::Funding);

        // Price the eventual swap up front so the recovery record knows how
        // much payment token this purchase is entitled to consume.
        let pricing = self
            .routes
            .quote(QuoteRequest {
                input_token: self.wallet.payment_token_mint,
                output_token: self.wallet.stablecoin_mint,
                amount: minor_to_base(amount_minor),
                mode: SwapMode::ExactOut,
                slippage_bps: self.config.slippage_bps,
            })
            .await?;
        let intended_source_amount = pricing.input_amount;

        let session = provider
            .open_session(
                amount_minor,
                &self.wallet.payment_token_mint.to_string(),
                &self.wallet.root_wallet.to_string(),
            )
            .await?;
        info!(
            session_id = %session.session_id,
            vendor = %vendor,
            amount_minor,
            "hosted on-ramp session opened"
        );

        match await_terminal(
            provider.as_ref(),
            &session,
            self.poll_delay(),
            self.config.max_retry_count,
            &handle.cancel,
        )
        .await?
        {
            OnrampOutcome::Succeeded => {}
            OnrampOutcome::Canceled => return Err(FundingError::Canceled),
            OnrampOutcome::Rejected => {
                return Err(FundingError::OnRampRejected(session.session_id))
            }
            OnrampOutcome::Errored(msg) => return Err(FundingError::Processor(msg)),
        }

        // Payment is captured; from here on the funds must be accounted for.
        self.store.set(
            &self.wallet.user_id,
            &RecoveryRecord {
                purchase_amount_minor: amount_minor,
                target_token: self.wallet.stablecoin_mint.to_string(),
                vendor,
                created_at_epoch_ms: now_epoch_ms(),
                intended_source_amount,
            },
        )?;
        self.sessions
            .set_status(handle.generation, FundingStatus::ConfirmingFunding);

        let new_balance = poller::poll_for_change(
            Arc::clone(&self.balances),
            &self.wallet.root_payment_account,
            initial_payment_balance,
            self.poll_delay(),
            self.config.max_retry_count,
        )
        .await
        .map_err(|timeout| {
            // Record stays armed: the delivery may still land later and
            // startup recovery will pick it up.
            warn!(error = %timeout, "payment token delivery not observed");
            FundingError::BalanceTimeout
        })?;

        let delivered = new_balance.saturating_sub(initial_payment_balance);
        if delivered != intended_source_amount {
            warn!(
                delivered,
                intended_source_amount, "processor delivery differs from quoted source amount"
            );
        }

        if !self.sessions.is_current(handle.generation) {
            // A newer purchase owns the wallet now; leave the record armed
            // for recovery and step aside.
            return Err(FundingError::Superseded);
        }

        let funded = self.swap_payment_to_deposit(amount_minor, intended_source_amount).await?;
        self.store.remove(&self.wallet.user_id)?;
        info!(
            confirmed_minor = funded.confirmed_minor,
            signature = %funded.receipt.signature,
            "card funding settled into deposit account"
        );
        Ok(funded)
    }

    /// Swap the delivered payment token into stablecoin, forwarded to the
    /// deposit account. When the slippage retry budget runs out, fall back
    /// to a salvage swap before giving up.
    async fn swap_payment_to_deposit(
        &self,
        amount_minor: u64,
        intended_source_amount: u64,
    ) -> Result<FundedBalance, FundingError> {
        let plan = SwapPlan {
            request: QuoteRequest {
                input_token: self.wallet.payment_token_mint,
                output_token: self.wallet.stablecoin_mint,
                amount: minor_to_base(amount_minor),
                mode: SwapMode::ExactOut,
                slippage_bps: self.config.slippage_bps,
            },
            prelude: vec![],
            postlude: vec![],
            forward_output_to: Some(self.wallet.deposit_account),
        };

        match self.swap.execute(&plan).await {
            Ok(outcome) => Ok(FundedBalance {
                confirmed_minor: base_to_minor(outcome.quote.output_amount),
                receipt: outcome.receipt,
            }),
            Err(SwapError::SlippageExceeded) => {
                warn!("swap retry budget exhausted, attempting salvage");
                self.salvage_to_deposit(intended_source_amount).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn salvage_to_deposit(
        &self,
        intended_source_amount: u64,
    ) -> Result<FundedBalance, FundingError> {
        match self
            .swap
            .salvage(
                &self.wallet.root_payment_account,
                &self.wallet.payment_token_mint,
                &self.wallet.stablecoin_mint,
                intended_source_amount,
                &self.wallet.deposit_account,
                self.config.slippage_bps,
            )
            .await
        {
            Ok(outcome) => Ok(FundedBalance {
                confirmed_minor: base_to_minor(outcome.recovered_output),
                receipt: outcome.receipt,
            }),
            Err(e @ SwapError::InsufficientFundsAfterSalvage { .. }) => {
                // The shortfall is established on-chain; keeping the record
                // armed would only re-announce the same loss.
                self.store.remove(&self.wallet.user_id)?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fund `amount_minor` of stablecoin by swapping an asset the user
    /// already holds. One atomic transaction: create the stablecoin token
    /// account if missing, swap exact-out into it, then a direct transfer
    /// of the output into the deposit account. Either the whole chain
    /// lands or none of it does.
    pub async fn fund_with_existing_crypto(
        &self,
        amount_minor: u64,
        input_token: Pubkey,
        input_token_account: Pubkey,
    ) -> Result<FundedBalance, FundingError> {
        let required_output = minor_to_base(amount_minor);
        let request = QuoteRequest {
            input_token,
            output_token: self.wallet.stablecoin_mint,
            amount: required_output,
            mode: SwapMode::ExactOut,
            slippage_bps: self.config.slippage_bps,
        };
        let pricing = self.routes.quote(request).await?;

        let available = self.balances.token_balance(&input_token_account).await?;
        if available < pricing.input_amount {
            return Err(SwapError::InsufficientInputBalance {
                available,
                required: pricing.input_amount,
            }
            .into());
        }

        let plan = SwapPlan {
            request,
            prelude: vec![self.settlement.create_token_account_instruction(
                &self.wallet.root_wallet,
                &self.wallet.stablecoin_mint,
            )],
            postlude: vec![self.settlement.deposit_transfer_instruction(
                &self.wallet.root_stablecoin_account,
                &self.wallet.stablecoin_mint,
                &self.wallet.deposit_account,
                required_output,
            )?],
            forward_output_to: Some(self.wallet.root_stablecoin_account),
        };
        let outcome = self.swap.execute(&plan).await?;
        info!(
            amount_minor,
            signature = %outcome.receipt.signature,
            "existing-crypto funding settled into deposit account"
        );
        Ok(FundedBalance {
            confirmed_minor: base_to_minor(outcome.quote.output_amount),
            receipt: outcome.receipt,
        })
    }
}
