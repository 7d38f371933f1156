// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! End-to-end purchase orchestration.
//!
//! One purchase is a linear pipeline: validate the intent, apply whatever
//! deposit balance the user already holds, fund the remainder (card or
//! existing crypto), finalize with the content service, then wait for the
//! access flags to flip. Side effects that assume a completed purchase
//! (stopping a running preview, auto-favoriting) run strictly after access
//! is confirmed.
//!
//! The pipeline is modeled as an explicit state machine so every attempt
//! leaves an inspectable trail; the transition function itself is pure.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::{AccessPoller, WatchedFlag};
use crate::config::PurchaseConfig;
use crate::content::ContentGateway;
use crate::error::{PurchaseError, ValidationError};
use crate::funding::FundingCoordinator;
use crate::gateway::BalanceSource;
use crate::models::{
    apply_existing_balance, base_to_minor, AccessGrant, FundingStatus, PurchaseIntent,
    PurchaseMethod, WalletContext,
};
use crate::session::SessionRegistry;
use crate::telemetry::{ErrorReporter, ReportContext};

// =============================================================================
// State Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Start,
    ApplyingBalance,
    Funding,
    Finalizing,
    ConfirmingAccess,
    Finished,
    Canceled,
    Failed,
}

impl PurchaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseState::Finished | PurchaseState::Canceled | PurchaseState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseEvent {
    Validated,
    /// Deposit balance applied; `covered` is true when nothing is left to
    /// fund.
    BalanceApplied { covered: bool },
    Funded,
    Finalized,
    AccessGranted,
    UserCanceled,
    Failure,
}

/// Pure transition function. Terminal states absorb every event; an event
/// that does not apply to the current state is a failure, not a panic.
pub fn transition(state: PurchaseState, event: PurchaseEvent) -> PurchaseState {
    use PurchaseEvent as E;
    use PurchaseState as S;

    if state.is_terminal() {
        return state;
    }
    match (state, event) {
        (_, E::UserCanceled) => S::Canceled,
        (_, E::Failure) => S::Failed,
        (S::Start, E::Validated) => S::ApplyingBalance,
        (S::ApplyingBalance, E::BalanceApplied { covered: true }) => S::Finalizing,
        (S::ApplyingBalance, E::BalanceApplied { covered: false }) => S::Funding,
        (S::Funding, E::Funded) => S::Finalizing,
        (S::Finalizing, E::Finalized) => S::ConfirmingAccess,
        (S::ConfirmingAccess, E::AccessGranted) => S::Finished,
        _ => S::Failed,
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Result of a completed purchase: the content is owned and its access
/// flags are confirmed server-side.
#[derive(Debug, Clone)]
pub struct Unlocked {
    pub content_id: String,
    pub access: AccessGrant,
}

pub struct PurchaseOrchestrator {
    content: Arc<dyn ContentGateway>,
    funding: Arc<FundingCoordinator>,
    access: Arc<AccessPoller>,
    balances: Arc<dyn BalanceSource>,
    sessions: Arc<SessionRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    wallet: WalletContext,
    config: PurchaseConfig,
    /// Token wired to a running preview player, stopped once the purchase
    /// completes.
    preview: Option<CancellationToken>,
}

impl PurchaseOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: Arc<dyn ContentGateway>,
        funding: Arc<FundingCoordinator>,
        access: Arc<AccessPoller>,
        balances: Arc<dyn BalanceSource>,
        sessions: Arc<SessionRegistry>,
        reporter: Arc<dyn ErrorReporter>,
        wallet: WalletContext,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            content,
            funding,
            access,
            balances,
            sessions,
            reporter,
            wallet,
            config,
            preview: None,
        }
    }

    /// Attach a preview-player token to stop on purchase completion.
    pub fn with_preview_token(mut self, token: CancellationToken) -> Self {
        self.preview = Some(token);
        self
    }

    fn report_context(&self, intent: &PurchaseIntent) -> ReportContext {
        ReportContext {
            user_id: self.wallet.user_id.clone(),
            root_wallet: Some(self.wallet.root_wallet.to_string()),
            deposit_account: Some(self.wallet.deposit_account.to_string()),
            vendor: Some(intent.vendor),
            content_id: Some(intent.content_id.clone()),
        }
    }

    /// Run one purchase to completion. Errors other than user cancellation
    /// are reported to telemetry before returning.
    pub async fn purchase(&self, intent: PurchaseIntent) -> Result<Unlocked, PurchaseError> {
        info!(
            content_id = %intent.content_id,
            content_type = ?intent.content_type,
            method = ?intent.method,
            total_minor = intent.total_minor(),
            "purchase started"
        );
        match self.run(&intent).await {
            Ok(unlocked) => {
                info!(content_id = %unlocked.content_id, "purchase finished");
                Ok(unlocked)
            }
            Err(e) => {
                if !e.is_cancellation() {
                    self.reporter.report(&e, &self.report_context(&intent));
                }
                Err(e)
            }
        }
    }

    async fn run(&self, intent: &PurchaseIntent) -> Result<Unlocked, PurchaseError> {
        let mut state = PurchaseState::Start;

        self.validate(intent).await?;
        state = self.advance(state, PurchaseEvent::Validated);

        // Apply whatever stablecoin already sits in the deposit account.
        let deposit_base = self
            .balances
            .token_balance(&self.wallet.deposit_account)
            .await
            .map_err(|e| PurchaseError::Unknown(e.to_string()))?;
        let balance_minor = base_to_minor(deposit_base);
        let application = apply_existing_balance(
            intent.price_minor,
            intent.extra_minor,
            balance_minor,
            self.config.min_purchase_minor,
        );
        debug!(
            balance_minor,
            amount_due = application.amount_due,
            balance_applied = application.balance_applied,
            "existing balance applied"
        );
        state = self.advance(
            state,
            PurchaseEvent::BalanceApplied {
                covered: application.amount_due == 0,
            },
        );

        if application.amount_due > 0 && intent.method == PurchaseMethod::Balance {
            // The balance method promises the deposit account covers the
            // total; a shortfall is the caller's error.
            self.advance(state, PurchaseEvent::Failure);
            return Err(PurchaseError::InsufficientBalance {
                balance: balance_minor,
                required: intent.total_minor(),
            });
        }

        let session = if application.amount_due > 0 {
            let handle = self.sessions.begin(intent.vendor, application.amount_due);
            let funded = match intent.method {
                PurchaseMethod::Card => {
                    self.funding
                        .fund_with_card(application.amount_due, intent.vendor, &handle)
                        .await
                }
                // The held asset lives in the root wallet's payment-token
                // account.
                _ => {
                    self.funding
                        .fund_with_existing_crypto(
                            application.amount_due,
                            self.wallet.payment_token_mint,
                            self.wallet.root_payment_account,
                        )
                        .await
                }
            };
            match funded {
                Ok(funded) => {
                    debug!(confirmed_minor = funded.confirmed_minor, "funding confirmed");
                    state = self.advance(state, PurchaseEvent::Funded);
                    Some(handle)
                }
                Err(e) => {
                    let purchase_err = PurchaseError::from(e);
                    let event = if purchase_err.is_cancellation() {
                        PurchaseEvent::UserCanceled
                    } else {
                        PurchaseEvent::Failure
                    };
                    let terminal = self.advance(state, event);
                    self.sessions.set_status(
                        handle.generation,
                        if terminal == PurchaseState::Canceled {
                            FundingStatus::Canceled
                        } else {
                            FundingStatus::Failed
                        },
                    );
                    return Err(purchase_err);
                }
            }
        } else {
            None
        };

        let finalize_result = self
            .content
            .finalize_purchase(
                &self.wallet.user_id,
                &intent.content_id,
                intent.content_type,
                intent.price_minor,
                intent.extra_minor,
            )
            .await;
        if let Err(e) = finalize_result {
            self.advance(state, PurchaseEvent::Failure);
            self.close_session(&session, FundingStatus::Failed);
            return Err(e.into());
        }
        state = self.advance(state, PurchaseEvent::Finalized);

        // The purchase is committed; cancellation no longer applies while
        // waiting for the access flags to flip.
        let access_result = self
            .access
            .poll_for_access(
                &intent.content_id,
                intent.content_type,
                &self.wallet.user_id,
                WatchedFlag::Stream,
                &CancellationToken::new(),
            )
            .await;
        let entity = match access_result {
            Ok(entity) => entity,
            Err(e) => {
                self.advance(state, PurchaseEvent::Failure);
                self.close_session(&session, FundingStatus::Failed);
                return Err(e);
            }
        };
        self.advance(state, PurchaseEvent::AccessGranted);
        self.close_session(&session, FundingStatus::Finished);

        self.apply_side_effects(intent).await;

        Ok(Unlocked {
            content_id: entity.content_id,
            access: entity.access,
        })
    }

    async fn validate(&self, intent: &PurchaseIntent) -> Result<(), PurchaseError> {
        let total = intent.total_minor();
        if total < self.config.min_purchase_minor {
            return Err(ValidationError::AmountBelowMinimum {
                amount: total,
                min: self.config.min_purchase_minor,
            }
            .into());
        }
        if total > self.config.max_purchase_minor {
            return Err(ValidationError::AmountAboveMaximum {
                amount: total,
                max: self.config.max_purchase_minor,
            }
            .into());
        }

        let entity = self
            .content
            .entity_with_access(&intent.content_id, intent.content_type, &self.wallet.user_id)
            .await?;
        let terms = entity
            .purchase_terms
            .ok_or_else(|| ValidationError::NotPurchasable(intent.content_id.clone()))?;
        if terms.price_minor != intent.price_minor {
            // Finalization charges the intent's price; a drifted server
            // price is worth a trace but not a hard stop.
            warn!(
                intent_price = intent.price_minor,
                listed_price = terms.price_minor,
                "listed price differs from intent"
            );
        }
        Ok(())
    }

    fn advance(&self, state: PurchaseState, event: PurchaseEvent) -> PurchaseState {
        let next = transition(state, event);
        debug!(from = ?state, event = ?event, to = ?next, "purchase state transition");
        next
    }

    fn close_session(&self, session: &Option<crate::session::SessionHandle>, status: FundingStatus) {
        if let Some(handle) = session {
            self.sessions.set_status(handle.generation, status);
        }
    }

    /// Post-unlock side effects. None of these can fail the purchase.
    async fn apply_side_effects(&self, intent: &PurchaseIntent) {
        if let Some(preview) = &self.preview {
            preview.cancel();
            debug!("preview playback stopped");
        }
        if let Err(e) = self
            .content
            .favorite(&self.wallet.user_id, &intent.content_id, intent.content_type)
            .await
        {
            warn!(content_id = %intent.content_id, error = %e, "auto-favorite failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseEvent as E;
    use PurchaseState as S;

    #[test]
    fn happy_path_with_funding() {
        let mut state = S::Start;
        for event in [
            E::Validated,
            E::BalanceApplied { covered: false },
            E::Funded,
            E::Finalized,
            E::AccessGranted,
        ] {
            state = transition(state, event);
        }
        assert_eq!(state, S::Finished);
    }

    #[test]
    fn covered_balance_skips_funding() {
        let state = transition(S::ApplyingBalance, E::BalanceApplied { covered: true });
        assert_eq!(state, S::Finalizing);
    }

    #[test]
    fn cancellation_applies_from_any_live_state() {
        for state in [S::Start, S::ApplyingBalance, S::Funding, S::Finalizing] {
            assert_eq!(transition(state, E::UserCanceled), S::Canceled);
        }
    }

    #[test]
    fn terminal_states_absorb_events() {
        for state in [S::Finished, S::Canceled, S::Failed] {
            assert_eq!(transition(state, E::Validated), state);
            assert_eq!(transition(state, E::Failure), state);
        }
    }

    #[test]
    fn out_of_order_event_fails() {
        assert_eq!(transition(S::Start, E::Funded), S::Failed);
        assert_eq!(transition(S::Funding, E::AccessGranted), S::Failed);
    }
}
