// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! # Chain Gateways
//!
//! Read-only blockchain and exchange-aggregator queries, plus the execution
//! endpoint transactions are relayed through. Nothing in this module holds
//! engine state; every type is a thin client over an external service.

pub mod aggregator;
pub mod rpc;

pub use aggregator::{AggregatorClient, QuoteRequest, SwapRoutes};
pub use rpc::{BalanceSource, ExecutionEndpoint, RpcGateway};
