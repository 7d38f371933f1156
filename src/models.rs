// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Core data model for the purchase orchestration engine.
//!
//! Monetary amounts appear in two unit systems:
//!
//! - **minor units**: cents of the display currency; all orchestration math
//!   (prices, balance application, purchase bounds) runs in minor units.
//! - **base units**: smallest on-chain unit of the 6-decimal stablecoin;
//!   everything at the settlement/swap boundary runs in base units.
//!
//! The conversion factor between the two is fixed at `10^4` and applied in
//! exactly one direction per call path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Decimals of the platform stablecoin token.
pub const STABLECOIN_DECIMALS: u8 = 6;

/// Base units per minor unit (cent) for the 6-decimal stablecoin.
pub const BASE_UNITS_PER_MINOR: u64 = 10_000;

/// Time-to-live of a [`RecoveryRecord`] before it is dropped rather than
/// retried (2 hours).
pub const RECOVERY_RECORD_TTL_MS: i64 = 2 * 60 * 60 * 1000;

/// Convert minor units (cents) to stablecoin base units.
pub fn minor_to_base(minor: u64) -> u64 {
    minor.saturating_mul(BASE_UNITS_PER_MINOR)
}

/// Convert stablecoin base units to minor units, truncating dust.
pub fn base_to_minor(base: u64) -> u64 {
    base / BASE_UNITS_PER_MINOR
}

/// Kind of purchasable content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Track,
    Album,
}

/// How the user chose to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseMethod {
    /// Pay entirely from the existing deposit-account balance.
    Balance,
    /// Pay by swapping another crypto asset the user already holds into
    /// the stablecoin.
    ExistingCrypto,
    /// Pay by card through a fiat processor.
    Card,
}

/// Fiat payment processor vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Stripe,
    Coinflow,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Stripe => write!(f, "stripe"),
            Vendor::Coinflow => write!(f, "coinflow"),
        }
    }
}

/// A user's request to acquire one piece of paid content.
///
/// Immutable for the lifetime of one purchase attempt; discarded on any
/// terminal state.
#[derive(Debug, Clone)]
pub struct PurchaseIntent {
    pub content_id: String,
    pub content_type: ContentType,
    /// Content price in minor units.
    pub price_minor: u64,
    /// Optional extra (pay-more) amount in minor units.
    pub extra_minor: u64,
    pub method: PurchaseMethod,
    pub vendor: Vendor,
}

impl PurchaseIntent {
    /// Total amount the purchase must cover, in minor units.
    pub fn total_minor(&self) -> u64 {
        self.price_minor.saturating_add(self.extra_minor)
    }
}

/// Lifecycle status of a funding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStatus {
    Start,
    Funding,
    ConfirmingFunding,
    Purchasing,
    Canceled,
    Failed,
    Finished,
}

impl FundingStatus {
    /// Terminal statuses end the session; a new one may then begin.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FundingStatus::Canceled | FundingStatus::Failed | FundingStatus::Finished
        )
    }
}

/// One in-flight funding attempt. At most one session is active per user;
/// superseded sessions are invalid and their late results are discarded.
#[derive(Debug, Clone)]
pub struct FundingSession {
    pub vendor: Vendor,
    pub status: FundingStatus,
    /// Stablecoin the session is trying to produce, in minor units.
    pub desired_stablecoin_minor: u64,
}

/// Swap amount interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    /// `amount` is the exact input; output floats with the market.
    ExactIn,
    /// `amount` is the exact output; input floats with the market.
    ExactOut,
}

/// A single-use quote from the exchange aggregator.
///
/// Quotes are never reused across settlement attempts; every retry re-fetches
/// a fresh one.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub input_token: Pubkey,
    pub output_token: Pubkey,
    /// Input amount in the input token's base units.
    pub input_amount: u64,
    /// Output amount in the output token's base units.
    pub output_amount: u64,
    pub slippage_bps: u16,
    /// Opaque aggregator route payload, echoed back when building the swap
    /// instructions for this quote.
    pub route: serde_json::Value,
}

/// Receipt of one confirmed on-chain settlement. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Transaction signature as returned by the execution endpoint.
    pub signature: String,
    /// Amount the settlement moved, in base units.
    pub confirmed_amount: u64,
}

/// Read-only view of a content entity's access flags, owned by the content
/// service. The orchestrator only observes false-to-true transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub stream: bool,
    pub download: bool,
}

/// Durable marker of an in-flight funding attempt.
///
/// Written before control passes to an external payment UI, cleared on
/// success or on confirmed permanent loss, re-armed on ambiguous failure.
/// At most one per user at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Purchase amount the funding attempt was for, in minor units.
    pub purchase_amount_minor: u64,
    /// Mint of the stablecoin the funds must end up in.
    pub target_token: String,
    pub vendor: Vendor,
    pub created_at_epoch_ms: i64,
    /// Source-asset amount supposedly deposited into the intermediate
    /// wallet, in the source token's base units. Salvage never exceeds this.
    pub intended_source_amount: u64,
}

impl RecoveryRecord {
    /// Age of the record relative to `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.created_at_epoch_ms
    }

    /// A record past its TTL is treated as absent regardless of content.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) > RECOVERY_RECORD_TTL_MS
    }
}

/// Current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Per-user wallet topology the engine operates on.
#[derive(Debug, Clone)]
pub struct WalletContext {
    pub user_id: String,
    /// Custodial intermediate wallet receiving processor-issued crypto.
    pub root_wallet: Pubkey,
    /// Root wallet's token account for the processor's payment token.
    pub root_payment_account: Pubkey,
    /// Root wallet's token account for the stablecoin.
    pub root_stablecoin_account: Pubkey,
    /// Per-user program-derived deposit account holding the stablecoin
    /// balance used for purchases.
    pub deposit_account: Pubkey,
    /// Payment token the fiat processor delivers (e.g. wrapped native).
    pub payment_token_mint: Pubkey,
    pub stablecoin_mint: Pubkey,
}

/// Result of applying an existing deposit balance against a purchase total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceApplication {
    /// Remaining amount to fund, in minor units.
    pub amount_due: u64,
    /// Portion of the existing balance consumed, in minor units.
    pub balance_applied: u64,
}

/// Compute how much of an existing balance to apply to `price + extra`.
///
/// The balance is only applied if the remainder would still meet the
/// configured minimum purchase amount; otherwise it is ignored and the full
/// total is charged, preventing sub-minimum trailing charges. Pure and
/// idempotent.
pub fn apply_existing_balance(
    price_minor: u64,
    extra_minor: u64,
    balance_minor: u64,
    min_purchase_minor: u64,
) -> BalanceApplication {
    let total = price_minor.saturating_add(extra_minor);
    if balance_minor >= total {
        return BalanceApplication {
            amount_due: 0,
            balance_applied: total,
        };
    }
    let remainder = total - balance_minor;
    if remainder < min_purchase_minor {
        BalanceApplication {
            amount_due: total,
            balance_applied: 0,
        }
    } else {
        BalanceApplication {
            amount_due: remainder,
            balance_applied: balance_minor,
        }
    }
}
