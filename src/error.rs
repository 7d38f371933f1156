// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Error taxonomy for the purchase engine.
//!
//! Each component owns a closed, exhaustively-matched error enum; boundaries
//! convert with `#[from]` rather than stringly-typed codes. Cancellation is
//! not a failure: it is surfaced as a distinct terminal state and never
//! reported to telemetry.

use crate::models::Vendor;
use crate::storage::StoreError;

/// Validation failures. Always terminal, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("purchase amount {amount} below configured minimum {min}")]
    AmountBelowMinimum { amount: u64, min: u64 },

    #[error("purchase amount {amount} above configured maximum {max}")]
    AmountAboveMaximum { amount: u64, max: u64 },

    #[error("unsupported funding vendor: {0}")]
    UnsupportedVendor(Vendor),

    #[error("content {0} has no purchase terms")]
    NotPurchasable(String),
}

/// Failures talking to a read-only or submission endpoint (chain RPC,
/// aggregator, content service).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Failures building, submitting, or confirming an on-chain transaction.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("transaction encoding failed: {0}")]
    Encoding(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("confirmation timed out for transaction {signature}")]
    ConfirmationTimeout { signature: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SettlementError {
    /// Submission-side failures are retried with fixed backoff; a
    /// confirmation timeout is not (the transaction may still land).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SettlementError::Submission(_) | SettlementError::Gateway(_)
        )
    }
}

/// Failures of the swap engine.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("swap exceeded slippage tolerance")]
    SlippageExceeded,

    #[error("no quote available: {0}")]
    NoQuote(String),

    #[error("insufficient input balance: have {available}, need {required}")]
    InsufficientInputBalance { available: u64, required: u64 },

    #[error("salvage output {actual} below expected {expected}")]
    InsufficientFundsAfterSalvage { expected: u64, actual: u64 },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

/// Failures of the funding coordinator.
#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    #[error("on-ramp rejected: {0}")]
    OnRampRejected(String),

    #[error("jurisdiction not supported by payment processor")]
    UnsupportedRegion,

    /// The user closed or aborted the payment UI. Not a failure.
    #[error("funding canceled by user")]
    Canceled,

    /// The session was superseded by a newer purchase attempt; its result
    /// is discarded.
    #[error("funding session superseded")]
    Superseded,

    #[error("payment processor error: {0}")]
    Processor(String),

    #[error("expected balance delta not observed within the retry budget")]
    BalanceTimeout,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error(transparent)]
    Store(#[from] crate::storage::StoreError),
}

/// Failures of the recovery manager.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Funds are confirmed gone with insufficient recovered amount.
    /// Terminal, reported, not retried.
    #[error("funds confirmed gone: recovered {recovered} of {expected}")]
    FundsGone { recovered: u64, expected: u64 },

    /// The record outlived its TTL; it is dropped and the loss reported.
    #[error("recovery record expired ({age_ms} ms old)")]
    Expired { age_ms: i64 },

    /// Failure of unknown permanence; the record is re-armed for a later
    /// attempt.
    #[error("ambiguous recovery failure: {0}")]
    Ambiguous(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level purchase failure surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("insufficient deposit balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    /// The user aborted funding. Distinct terminal state, not an error for
    /// telemetry purposes.
    #[error("purchase canceled by user")]
    Canceled,

    #[error(transparent)]
    Funding(FundingError),

    #[error("content service call failed: {0}")]
    Content(String),

    #[error("content access was not granted within the polling budget")]
    AccessTimeout,

    /// Any uncaught dependency failure, wrapped so nothing is left
    /// unclassified.
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl From<FundingError> for PurchaseError {
    fn from(e: FundingError) -> Self {
        match e {
            FundingError::Canceled | FundingError::Superseded => PurchaseError::Canceled,
            other => PurchaseError::Funding(other),
        }
    }
}

impl From<GatewayError> for PurchaseError {
    fn from(e: GatewayError) -> Self {
        PurchaseError::Content(e.to_string())
    }
}

impl PurchaseError {
    /// Cancellations are terminal but are neither reported to telemetry nor
    /// shown to the user as errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PurchaseError::Canceled)
    }
}
