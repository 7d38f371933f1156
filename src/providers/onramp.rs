// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Fiat on-ramp integration: hosted payment sessions and their terminal
//! signals.
//!
//! A hosted session is opened with an amount, a destination currency, and a
//! destination wallet address. The processor then walks the session through
//! `initialized | requires_payment | fulfillment_processing |
//! fulfillment_complete | rejected | error`. The wait for a terminal status
//! is bounded only by user action: the hosted UI cannot push a "closed"
//! event, so the host application signals user close through a cancellation
//! token, which the terminal race maps to [`OnrampOutcome::Canceled`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use url::Url;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FundingError, GatewayError};
use crate::models::Vendor;

/// Processor-side session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnrampStatus {
    Initialized,
    RequiresPayment,
    FulfillmentProcessing,
    FulfillmentComplete,
    Rejected,
    Error,
}

impl OnrampStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OnrampStatus::FulfillmentComplete | OnrampStatus::Rejected | OnrampStatus::Error
        )
    }
}

/// Terminal result of one hosted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnrampOutcome {
    Succeeded,
    Rejected,
    Errored(String),
    Canceled,
}

/// An open hosted payment session.
#[derive(Debug, Clone)]
pub struct OnrampSession {
    pub session_id: String,
    /// URL of the hosted payment UI the host application must surface.
    pub action_url: String,
    pub vendor: Vendor,
}

/// A fiat payment processor capable of hosted on-ramp sessions.
#[async_trait]
pub trait OnrampProvider: Send + Sync {
    /// Open a hosted session delivering `destination_currency` to
    /// `destination_wallet`.
    async fn open_session(
        &self,
        amount_minor: u64,
        destination_currency: &str,
        destination_wallet: &str,
    ) -> Result<OnrampSession, FundingError>;

    /// Fetch the session's current status.
    async fn poll_status(&self, session_id: &str) -> Result<OnrampStatus, FundingError>;
}

/// Race the session's terminal signals against user cancellation.
///
/// There is deliberately no timeout here: the wait is bounded only by the
/// user completing or closing the hosted UI. A status fetch can blip while
/// the user's payment is already captured, so transient fetch failures keep
/// the race alive; only `max_consecutive_errors` failures in a row surface.
pub async fn await_terminal(
    provider: &dyn OnrampProvider,
    session: &OnrampSession,
    poll_delay: Duration,
    max_consecutive_errors: u32,
    cancel: &CancellationToken,
) -> Result<OnrampOutcome, FundingError> {
    let mut consecutive_errors: u32 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = %session.session_id, "hosted payment UI closed by user");
                return Ok(OnrampOutcome::Canceled);
            }
            _ = tokio::time::sleep(poll_delay) => {}
        }

        let status = match provider.poll_status(&session.session_id).await {
            Ok(status) => {
                consecutive_errors = 0;
                status
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= max_consecutive_errors {
                    return Err(e);
                }
                warn!(
                    session_id = %session.session_id,
                    consecutive_errors,
                    error = %e,
                    "on-ramp status fetch failed, staying in the terminal race"
                );
                continue;
            }
        };
        debug!(session_id = %session.session_id, status = ?status, "on-ramp session status");
        match status {
            OnrampStatus::FulfillmentComplete => return Ok(OnrampOutcome::Succeeded),
            OnrampStatus::Rejected => return Ok(OnrampOutcome::Rejected),
            OnrampStatus::Error => {
                return Ok(OnrampOutcome::Errored(format!(
                    "processor reported error for session {}",
                    session.session_id
                )))
            }
            _ => {}
        }
    }
}

/// Map a raw processor status string. Unknown statuses are treated as still
/// in flight rather than failing the session.
pub fn map_session_status(raw: &str) -> OnrampStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "initialized" => OnrampStatus::Initialized,
        "requires_payment" => OnrampStatus::RequiresPayment,
        "fulfillment_complete" => OnrampStatus::FulfillmentComplete,
        "rejected" => OnrampStatus::Rejected,
        "error" => OnrampStatus::Error,
        _ => OnrampStatus::FulfillmentProcessing,
    }
}

/// HTTP client for a hosted on-ramp processor.
#[derive(Debug, Clone)]
pub struct HostedOnrampClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    vendor: Vendor,
}

impl HostedOnrampClient {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        api_key: impl Into<String>,
        vendor: Vendor,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            vendor,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl OnrampProvider for HostedOnrampClient {
    async fn open_session(
        &self,
        amount_minor: u64,
        destination_currency: &str,
        destination_wallet: &str,
    ) -> Result<OnrampSession, FundingError> {
        let idempotency_key = Uuid::new_v4().to_string();
        let payload = json!({
            "amount": amount_minor,
            "destination_currency": destination_currency,
            "destination_wallet_address": destination_wallet,
        });

        let response = self
            .http
            .post(self.endpoint("/v1/onramp/sessions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Idempotency-Key", &idempotency_key)
            .json(&payload)
            .send()
            .await
            .map_err(GatewayError::from)?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(FundingError::UnsupportedRegion);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FundingError::Processor(format!(
                "session create returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("session invalid JSON: {e}")))?;
        let session_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing session id in response".to_string())
            })?
            .to_string();
        let action_url = body
            .pointer("/hosted_page/url")
            .or_else(|| body.get("action_url"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing hosted page url in response".to_string())
            })?
            .to_string();

        info!(
            session_id = %session_id,
            vendor = %self.vendor,
            amount_minor,
            "opened hosted on-ramp session"
        );
        Ok(OnrampSession {
            session_id,
            action_url,
            vendor: self.vendor,
        })
    }

    async fn poll_status(&self, session_id: &str) -> Result<OnrampStatus, FundingError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/v1/onramp/sessions/{session_id}")))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(GatewayError::from)?;
        if !response.status().is_success() {
            return Err(FundingError::Processor(format!(
                "status fetch returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("status invalid JSON: {e}")))?;
        let raw = body.get("status").and_then(Value::as_str).ok_or_else(|| {
            GatewayError::InvalidResponse("missing status in response".to_string())
        })?;
        Ok(map_session_status(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(map_session_status("initialized"), OnrampStatus::Initialized);
        assert_eq!(
            map_session_status("REQUIRES_PAYMENT"),
            OnrampStatus::RequiresPayment
        );
        assert_eq!(
            map_session_status("fulfillment_complete"),
            OnrampStatus::FulfillmentComplete
        );
        assert_eq!(map_session_status("rejected"), OnrampStatus::Rejected);
        assert_eq!(map_session_status("error"), OnrampStatus::Error);
        // Unknown statuses stay in flight.
        assert_eq!(
            map_session_status("settling"),
            OnrampStatus::FulfillmentProcessing
        );
    }

    #[test]
    fn terminality() {
        assert!(OnrampStatus::FulfillmentComplete.is_terminal());
        assert!(OnrampStatus::Rejected.is_terminal());
        assert!(OnrampStatus::Error.is_terminal());
        assert!(!OnrampStatus::RequiresPayment.is_terminal());
    }

    /// Per-poll script: `Ok` is a status, `Err` a failed status fetch.
    struct ScriptedProvider {
        replies: Vec<Result<OnrampStatus, &'static str>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<OnrampStatus, &'static str>>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OnrampProvider for ScriptedProvider {
        async fn open_session(
            &self,
            _amount_minor: u64,
            _destination_currency: &str,
            _destination_wallet: &str,
        ) -> Result<OnrampSession, FundingError> {
            Ok(OnrampSession {
                session_id: "session-1".to_string(),
                action_url: "https://pay.example.com/s/1".to_string(),
                vendor: Vendor::Stripe,
            })
        }

        async fn poll_status(&self, _session_id: &str) -> Result<OnrampStatus, FundingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(n).unwrap_or(&Ok(OnrampStatus::Error)) {
                Ok(status) => Ok(*status),
                Err(msg) => Err(FundingError::Processor(msg.to_string())),
            }
        }
    }

    fn session() -> OnrampSession {
        OnrampSession {
            session_id: "session-1".to_string(),
            action_url: "https://pay.example.com/s/1".to_string(),
            vendor: Vendor::Stripe,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn race_completes_on_fulfillment() {
        let provider = ScriptedProvider::new(vec![
            Ok(OnrampStatus::Initialized),
            Ok(OnrampStatus::RequiresPayment),
            Ok(OnrampStatus::FulfillmentProcessing),
            Ok(OnrampStatus::FulfillmentComplete),
        ]);
        let cancel = CancellationToken::new();
        let outcome = await_terminal(&provider, &session(), Duration::from_millis(100), 5, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, OnrampOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn race_yields_canceled_when_token_fires() {
        let provider = ScriptedProvider::new(vec![Ok(OnrampStatus::RequiresPayment); 100]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = await_terminal(&provider, &session(), Duration::from_millis(100), 5, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, OnrampOutcome::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn race_maps_rejection() {
        let provider = ScriptedProvider::new(vec![Ok(OnrampStatus::Rejected)]);
        let cancel = CancellationToken::new();
        let outcome = await_terminal(&provider, &session(), Duration::from_millis(100), 5, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, OnrampOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn race_survives_a_status_fetch_blip() {
        // One failed fetch between the user paying and fulfillment being
        // observed must not abort the race: the payment is already captured.
        let provider = ScriptedProvider::new(vec![
            Ok(OnrampStatus::RequiresPayment),
            Err("status fetch returned 502"),
            Ok(OnrampStatus::FulfillmentComplete),
        ]);
        let cancel = CancellationToken::new();
        let outcome = await_terminal(&provider, &session(), Duration::from_millis(100), 5, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, OnrampOutcome::Succeeded);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn race_surfaces_persistent_status_failure() {
        let provider = ScriptedProvider::new(vec![Err("status fetch returned 502"); 10]);
        let cancel = CancellationToken::new();
        let result =
            await_terminal(&provider, &session(), Duration::from_millis(100), 3, &cancel).await;
        assert!(matches!(result, Err(FundingError::Processor(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
