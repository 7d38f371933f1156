// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! JSON-RPC gateway: token balance reads, rent queries, transaction
//! submission and confirmation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use url::Url;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::Transaction};

use crate::error::GatewayError;

/// Size of an SPL token account, used for rent-exemption queries.
const TOKEN_ACCOUNT_SIZE: u64 = 165;

/// Read-only balance and fee queries. No side effects.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of a token account in base units. A missing account reads
    /// as zero.
    async fn token_balance(&self, account: &Pubkey) -> Result<u64, GatewayError>;

    /// Minimum rent-exempt reserve for a token account, in lamports.
    async fn minimum_rent(&self) -> Result<u64, GatewayError>;
}

/// Submission surface for signed transactions.
#[async_trait]
pub trait ExecutionEndpoint: Send + Sync {
    /// Submit a signed transaction, returning its signature.
    async fn submit(&self, tx: &Transaction) -> Result<String, GatewayError>;

    /// Whether the transaction with this signature has reached finality.
    /// A transaction that landed with an on-chain error is surfaced as
    /// `GatewayError::Rpc` carrying the error string.
    async fn is_confirmed(&self, signature: &str) -> Result<bool, GatewayError>;

    async fn latest_blockhash(&self) -> Result<Hash, GatewayError>;
}

/// HTTP JSON-RPC client for the execution endpoint.
#[derive(Debug, Clone)]
pub struct RpcGateway {
    http: reqwest::Client,
    url: Url,
}

impl RpcGateway {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.http.post(self.url.clone()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Rpc(format!(
                "{method} returned {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("{method} invalid JSON: {e}")))?;
        if let Some(err) = payload.get("error") {
            return Err(GatewayError::Rpc(format!("{method} failed: {err}")));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{method} missing result")))
    }
}

/// Pull the base-unit amount out of a `getTokenAccountBalance` result.
fn extract_token_amount(result: &Value) -> Result<u64, GatewayError> {
    result
        .pointer("/value/amount")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidResponse("token balance response missing amount".to_string())
        })?
        .parse::<u64>()
        .map_err(|e| GatewayError::InvalidResponse(format!("token amount not a u64: {e}")))
}

/// Interpret one entry of a `getSignatureStatuses` result.
fn interpret_signature_status(entry: &Value) -> Result<bool, GatewayError> {
    if entry.is_null() {
        return Ok(false);
    }
    if let Some(err) = entry.get("err") {
        if !err.is_null() {
            return Err(GatewayError::Rpc(format!("transaction failed: {err}")));
        }
    }
    Ok(matches!(
        entry
            .get("confirmationStatus")
            .and_then(Value::as_str)
            .unwrap_or(""),
        "confirmed" | "finalized"
    ))
}

#[async_trait]
impl BalanceSource for RpcGateway {
    async fn token_balance(&self, account: &Pubkey) -> Result<u64, GatewayError> {
        let result = self
            .call(
                "getTokenAccountBalance",
                json!([account.to_string(), {"commitment": "confirmed"}]),
            )
            .await;
        match result {
            Ok(value) => extract_token_amount(&value),
            // An unfunded wallet has no token account yet.
            Err(GatewayError::Rpc(msg)) if msg.contains("could not find account") => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn minimum_rent(&self) -> Result<u64, GatewayError> {
        let result = self
            .call(
                "getMinimumBalanceForRentExemption",
                json!([TOKEN_ACCOUNT_SIZE]),
            )
            .await?;
        result.as_u64().ok_or_else(|| {
            GatewayError::InvalidResponse("rent response not a u64".to_string())
        })
    }
}

#[async_trait]
impl ExecutionEndpoint for RpcGateway {
    async fn submit(&self, tx: &Transaction) -> Result<String, GatewayError> {
        let wire = bincode::serialize(tx)
            .map_err(|e| GatewayError::InvalidResponse(format!("tx serialization: {e}")))?;
        let encoded = BASE64.encode(wire);
        let result = self
            .call(
                "sendTransaction",
                json!([encoded, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("signature not a string".to_string()))
    }

    async fn is_confirmed(&self, signature: &str) -> Result<bool, GatewayError> {
        let result = self
            .call("getSignatureStatuses", json!([[signature]]))
            .await?;
        let entry = result
            .pointer("/value/0")
            .ok_or_else(|| GatewayError::InvalidResponse("missing status entry".to_string()))?;
        interpret_signature_status(entry)
    }

    async fn latest_blockhash(&self) -> Result<Hash, GatewayError> {
        let result = self.call("getLatestBlockhash", json!([])).await?;
        let raw = result
            .pointer("/value/blockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse("missing blockhash".to_string()))?;
        raw.parse::<Hash>()
            .map_err(|e| GatewayError::InvalidResponse(format!("bad blockhash: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_amount_parses_string_value() {
        let value = json!({"context": {"slot": 1}, "value": {"amount": "1500000", "decimals": 6}});
        assert_eq!(extract_token_amount(&value).unwrap(), 1_500_000);
    }

    #[test]
    fn token_amount_rejects_missing_field() {
        let value = json!({"value": {"decimals": 6}});
        assert!(extract_token_amount(&value).is_err());
    }

    #[test]
    fn null_status_is_unconfirmed() {
        assert!(!interpret_signature_status(&Value::Null).unwrap());
    }

    #[test]
    fn confirmed_and_finalized_count() {
        let entry = json!({"err": null, "confirmationStatus": "confirmed"});
        assert!(interpret_signature_status(&entry).unwrap());
        let entry = json!({"err": null, "confirmationStatus": "finalized"});
        assert!(interpret_signature_status(&entry).unwrap());
        let entry = json!({"err": null, "confirmationStatus": "processed"});
        assert!(!interpret_signature_status(&entry).unwrap());
    }

    #[test]
    fn on_chain_error_is_surfaced() {
        let entry = json!({"err": {"InstructionError": [0, "Custom"]}, "confirmationStatus": "confirmed"});
        let err = interpret_signature_status(&entry).unwrap_err();
        assert!(err.to_string().contains("InstructionError"));
    }
}
