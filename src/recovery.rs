// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Startup recovery for purchases interrupted between payment capture and
//! settlement.
//!
//! The funding coordinator writes a durable record the moment an on-ramp
//! reports payment success and clears it only after the stablecoin lands in
//! the deposit account. Whatever record survives a restart is handled here:
//! salvage the delivered payment token into the deposit account, bounded by
//! what the interrupted purchase was entitled to spend.
//!
//! Recovery yields to live traffic. It claims the session registry only if
//! no purchase is active and leaves the record armed when it cannot run,
//! so a record is processed exactly once at a quiet moment.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::PurchaseConfig;
use crate::error::{PurchaseError, RecoveryError, SwapError};
use crate::models::{base_to_minor, now_epoch_ms, FundingStatus, RecoveryRecord, WalletContext};
use crate::session::SessionRegistry;
use crate::storage::RecoveryStore;
use crate::swap::SwapEngine;
use crate::telemetry::{ErrorReporter, ReportContext};

/// What a startup recovery pass concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No record, or a live purchase owns the wallet; nothing done.
    NoOp,
    /// Funds were salvaged into the deposit account.
    Succeeded { recovered_minor: u64 },
    /// Failure of unknown permanence; the record was written back for a
    /// later attempt.
    ReArmed,
    /// The record outlived its TTL and was dropped.
    Expired,
    /// The funds are confirmed unrecoverable. Reported, record cleared.
    Lost,
}

pub struct RecoveryManager {
    store: Arc<RecoveryStore>,
    swap: Arc<SwapEngine>,
    sessions: Arc<SessionRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    wallet: WalletContext,
    config: PurchaseConfig,
}

impl RecoveryManager {
    pub fn new(
        store: Arc<RecoveryStore>,
        swap: Arc<SwapEngine>,
        sessions: Arc<SessionRegistry>,
        reporter: Arc<dyn ErrorReporter>,
        wallet: WalletContext,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            store,
            swap,
            sessions,
            reporter,
            wallet,
            config,
        }
    }

    fn report_context(&self, record: &RecoveryRecord) -> ReportContext {
        ReportContext {
            user_id: self.wallet.user_id.clone(),
            root_wallet: Some(self.wallet.root_wallet.to_string()),
            deposit_account: Some(self.wallet.deposit_account.to_string()),
            vendor: Some(record.vendor),
            content_id: None,
        }
    }

    /// Run one recovery pass. Called once at startup, before the engine
    /// starts taking purchases.
    pub async fn run_at_startup(&self) -> Result<RecoveryOutcome, RecoveryError> {
        let record = match self.store.get(&self.wallet.user_id)? {
            Some(record) => record,
            None => return Ok(RecoveryOutcome::NoOp),
        };

        let handle = match self
            .sessions
            .try_begin_if_idle(record.vendor, record.purchase_amount_minor)
        {
            Some(handle) => handle,
            None => {
                info!("live purchase session active, deferring recovery");
                return Ok(RecoveryOutcome::NoOp);
            }
        };

        let now = now_epoch_ms();
        if record.is_expired(now) {
            let age_ms = record.age_ms(now);
            warn!(age_ms, "recovery record expired, dropping it");
            self.store.remove(&self.wallet.user_id)?;
            self.reporter.report(
                &PurchaseError::Unknown(RecoveryError::Expired { age_ms }.to_string()),
                &self.report_context(&record),
            );
            self.sessions.set_status(handle.generation, FundingStatus::Failed);
            return Ok(RecoveryOutcome::Expired);
        }

        // Clear before salvaging so a crash mid-salvage cannot loop forever
        // on the same record; an ambiguous failure re-arms it explicitly.
        self.store.remove(&self.wallet.user_id)?;

        info!(
            purchase_amount_minor = record.purchase_amount_minor,
            intended_source_amount = record.intended_source_amount,
            vendor = %record.vendor,
            "resuming interrupted funding via salvage"
        );

        match self
            .swap
            .salvage(
                &self.wallet.root_payment_account,
                &self.wallet.payment_token_mint,
                &self.wallet.stablecoin_mint,
                record.intended_source_amount,
                &self.wallet.deposit_account,
                self.config.slippage_bps,
            )
            .await
        {
            Ok(outcome) => {
                let recovered_minor = base_to_minor(outcome.recovered_output);
                info!(
                    recovered_minor,
                    signature = %outcome.receipt.signature,
                    "interrupted funding recovered into deposit account"
                );
                self.sessions
                    .set_status(handle.generation, FundingStatus::Finished);
                Ok(RecoveryOutcome::Succeeded { recovered_minor })
            }
            Err(SwapError::InsufficientInputBalance { available, .. }) => {
                // Nothing recoverable sits in the intermediate wallet.
                self.report_loss(
                    RecoveryError::FundsGone {
                        recovered: available,
                        expected: record.intended_source_amount,
                    },
                    &record,
                );
                self.sessions.set_status(handle.generation, FundingStatus::Failed);
                Ok(RecoveryOutcome::Lost)
            }
            Err(SwapError::InsufficientFundsAfterSalvage { expected, actual }) => {
                self.report_loss(
                    RecoveryError::FundsGone {
                        recovered: actual,
                        expected,
                    },
                    &record,
                );
                self.sessions.set_status(handle.generation, FundingStatus::Failed);
                Ok(RecoveryOutcome::Lost)
            }
            Err(e) => {
                // Infrastructure fault: the funds may still be there, so put
                // the record back and try again next startup.
                let ambiguous = RecoveryError::Ambiguous(e.to_string());
                warn!(error = %ambiguous, "recovery salvage inconclusive, re-arming record");
                self.store.set(&self.wallet.user_id, &record)?;
                self.sessions.set_status(handle.generation, FundingStatus::Failed);
                Ok(RecoveryOutcome::ReArmed)
            }
        }
    }

    fn report_loss(&self, err: RecoveryError, record: &RecoveryRecord) {
        warn!(error = %err, "recovery concluded funds are unrecoverable");
        self.reporter.report(
            &PurchaseError::Unknown(err.to_string()),
            &self.report_context(record),
        );
    }
}
