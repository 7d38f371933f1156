// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Error telemetry and logging setup.
//!
//! Terminal errors are reported with enough context to diagnose stranded
//! funds: wallet and deposit account identifiers, never key material.
//! Cancellations are never reported.

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::error::PurchaseError;
use crate::models::Vendor;

/// Context attached to every telemetry report.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub user_id: String,
    pub root_wallet: Option<String>,
    pub deposit_account: Option<String>,
    pub vendor: Option<Vendor>,
    pub content_id: Option<String>,
}

/// Error-telemetry collaborator.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &PurchaseError, ctx: &ReportContext);
}

/// Reporter that emits structured `tracing` error events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &PurchaseError, ctx: &ReportContext) {
        if err.is_cancellation() {
            return;
        }
        error!(
            user_id = %ctx.user_id,
            root_wallet = ctx.root_wallet.as_deref().unwrap_or("-"),
            deposit_account = ctx.deposit_account.as_deref().unwrap_or("-"),
            vendor = ctx.vendor.map(|v| v.to_string()).as_deref().unwrap_or("-"),
            content_id = ctx.content_id.as_deref().unwrap_or("-"),
            error = %err,
            "purchase flow failed"
        );
    }
}

/// Initialize the tracing subscriber for host binaries.
///
/// `LOG_FORMAT=json` selects JSON output; anything else is pretty. The
/// filter comes from `RUST_LOG` with an `info` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reporter that counts reported (non-cancellation) errors.
    #[derive(Default)]
    pub struct CountingReporter {
        pub reports: AtomicUsize,
    }

    impl ErrorReporter for CountingReporter {
        fn report(&self, err: &PurchaseError, _ctx: &ReportContext) {
            if !err.is_cancellation() {
                self.reports.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn cancellation_is_never_counted() {
        let reporter = CountingReporter::default();
        reporter.report(&PurchaseError::Canceled, &ReportContext::default());
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 0);

        reporter.report(
            &PurchaseError::AccessTimeout,
            &ReportContext {
                user_id: "user-1".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 1);
    }
}
