// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Chorus Purchase - Content-Purchase Orchestration Engine
//!
//! This crate converts funds (existing deposit balance, fiat via a card
//! processor, or another held crypto asset) into the platform stablecoin,
//! settles it into a per-user on-chain deposit account, and confirms that
//! content access has been granted. The flow survives partial failures
//! (closed payment UI, processor timeout, swap slippage, process restart)
//! through bounded retries and a durable recovery record.
//!
//! ## Modules
//!
//! - `orchestrator` - Top-level purchase state machine
//! - `funding` - Funding coordinator (card and existing-crypto paths)
//! - `swap` - Swap engine with slippage retry and salvage fallback
//! - `settlement` - Transaction building, signing, submission, confirmation
//! - `poller` - Bounded balance-delta polling
//! - `access` - Access confirmation polling with album fan-out
//! - `recovery` - Startup recovery of interrupted funding attempts
//! - `gateway` - Read-only chain queries and the execution endpoint
//! - `providers` - Fiat payment processor clients
//! - `content` - Content-access service client
//! - `storage` - Durable recovery record store (redb)

pub mod access;
pub mod config;
pub mod content;
pub mod error;
pub mod funding;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod providers;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod settlement;
pub mod storage;
pub mod swap;
pub mod telemetry;

pub use error::{
    FundingError, GatewayError, PurchaseError, RecoveryError, SettlementError, SwapError,
    ValidationError,
};
pub use models::{
    AccessGrant, ContentType, FundingSession, FundingStatus, PurchaseIntent, PurchaseMethod,
    RecoveryRecord, SettlementReceipt, SwapMode, SwapQuote, Vendor, WalletContext,
};
pub use orchestrator::{PurchaseOrchestrator, Unlocked};
