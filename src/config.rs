// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! # Remote Configuration Knobs
//!
//! Read-only numeric knobs the engine sources from a remote configuration
//! document, each with a hard-coded fallback default used when the remote
//! document is unavailable or omits the field.
//!
//! ## Knobs
//!
//! | Knob | Description | Default |
//! |------|-------------|---------|
//! | `min_purchase_minor` | Minimum purchase amount (cents) | `100` |
//! | `max_purchase_minor` | Maximum purchase amount (cents) | `100_000` |
//! | `slippage_bps` | Swap slippage tolerance (basis points) | `50` |
//! | `poll_delay_ms` | Delay between balance polls | `1_000` |
//! | `max_retry_count` | Balance poll retry budget | `20` |
//! | `swap_retry_count` | Slippage-bounded swap retry budget | `3` |
//! | `access_poll_interval_ms` | Access confirmation poll interval | `1_000` |

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::GatewayError;

/// Engine configuration with every knob resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseConfig {
    pub min_purchase_minor: u64,
    pub max_purchase_minor: u64,
    pub slippage_bps: u16,
    pub poll_delay_ms: u64,
    pub max_retry_count: u32,
    pub swap_retry_count: u32,
    pub access_poll_interval_ms: u64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            min_purchase_minor: 100,
            max_purchase_minor: 100_000,
            slippage_bps: 50,
            poll_delay_ms: 1_000,
            max_retry_count: 20,
            swap_retry_count: 3,
            access_poll_interval_ms: 1_000,
        }
    }
}

/// Partial overrides as served by the remote document. Absent fields fall
/// back to defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct RemoteOverrides {
    min_purchase_minor: Option<u64>,
    max_purchase_minor: Option<u64>,
    slippage_bps: Option<u16>,
    poll_delay_ms: Option<u64>,
    max_retry_count: Option<u32>,
    swap_retry_count: Option<u32>,
    access_poll_interval_ms: Option<u64>,
}

impl PurchaseConfig {
    fn merged(overrides: RemoteOverrides) -> Self {
        let defaults = Self::default();
        Self {
            min_purchase_minor: overrides
                .min_purchase_minor
                .unwrap_or(defaults.min_purchase_minor),
            max_purchase_minor: overrides
                .max_purchase_minor
                .unwrap_or(defaults.max_purchase_minor),
            slippage_bps: overrides.slippage_bps.unwrap_or(defaults.slippage_bps),
            poll_delay_ms: overrides.poll_delay_ms.unwrap_or(defaults.poll_delay_ms),
            max_retry_count: overrides
                .max_retry_count
                .unwrap_or(defaults.max_retry_count),
            swap_retry_count: overrides
                .swap_retry_count
                .unwrap_or(defaults.swap_retry_count),
            access_poll_interval_ms: overrides
                .access_poll_interval_ms
                .unwrap_or(defaults.access_poll_interval_ms),
        }
    }
}

/// Fetches the remote configuration document.
#[derive(Debug, Clone)]
pub struct RemoteConfigClient {
    http: reqwest::Client,
    url: Url,
}

impl RemoteConfigClient {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    /// Fetch and merge remote overrides. Any failure falls back to the
    /// hard-coded defaults with a warning rather than blocking a purchase.
    pub async fn fetch(&self) -> PurchaseConfig {
        match self.try_fetch().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, url = %self.url, "remote config unavailable, using defaults");
                PurchaseConfig::default()
            }
        }
    }

    async fn try_fetch(&self) -> Result<PurchaseConfig, GatewayError> {
        let response = self.http.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "remote config returned {}",
                response.status()
            )));
        }
        let overrides: RemoteOverrides = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Ok(PurchaseConfig::merged(overrides))
    }
}
