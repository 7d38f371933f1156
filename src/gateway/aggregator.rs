// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Exchange-aggregator client: swap quotes and swap instruction building.
//!
//! Quotes are single-use. The engine re-fetches a fresh quote for every
//! settlement attempt and echoes the opaque route payload back to the
//! aggregator when asking for instructions.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::error::{GatewayError, SwapError};
use crate::models::{SwapMode, SwapQuote};

/// Parameters of one quote request.
#[derive(Debug, Clone, Copy)]
pub struct QuoteRequest {
    pub input_token: Pubkey,
    pub output_token: Pubkey,
    /// Input or output amount in base units, per `mode`.
    pub amount: u64,
    pub mode: SwapMode,
    pub slippage_bps: u16,
}

/// Quote and instruction-building surface of the exchange aggregator.
#[async_trait]
pub trait SwapRoutes: Send + Sync {
    async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, SwapError>;

    /// Build the on-chain instructions realizing `quote` for `user`. When
    /// `destination_token_account` is set the aggregator routes the swap
    /// output there directly.
    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
        destination_token_account: Option<&Pubkey>,
    ) -> Result<Vec<Instruction>, SwapError>;
}

/// Wire shape of one instruction as served by the aggregator.
#[derive(Debug, Clone, Deserialize)]
struct WireInstruction {
    program_id: String,
    accounts: Vec<WireAccountMeta>,
    /// Base64-encoded instruction data.
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SwapInstructionsResponse {
    #[serde(default)]
    setup_instructions: Vec<WireInstruction>,
    swap_instruction: WireInstruction,
    #[serde(default)]
    cleanup_instructions: Vec<WireInstruction>,
}

fn parse_pubkey(raw: &str) -> Result<Pubkey, GatewayError> {
    raw.parse::<Pubkey>()
        .map_err(|e| GatewayError::InvalidResponse(format!("bad pubkey {raw}: {e}")))
}

fn decode_instruction(wire: &WireInstruction) -> Result<Instruction, GatewayError> {
    let program_id = parse_pubkey(&wire.program_id)?;
    let accounts = wire
        .accounts
        .iter()
        .map(|meta| {
            Ok(AccountMeta {
                pubkey: parse_pubkey(&meta.pubkey)?,
                is_signer: meta.is_signer,
                is_writable: meta.is_writable,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;
    let data = BASE64
        .decode(&wire.data)
        .map_err(|e| GatewayError::InvalidResponse(format!("bad instruction data: {e}")))?;
    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

fn parse_amount_field(route: &Value, field: &str) -> Result<u64, GatewayError> {
    let raw = route
        .get(field)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("quote missing {field}")))?;
    match raw {
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|e| GatewayError::InvalidResponse(format!("{field} not a u64: {e}"))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{field} not a u64"))),
        _ => Err(GatewayError::InvalidResponse(format!(
            "{field} has unexpected type"
        ))),
    }
}

/// HTTP client for the aggregator API.
#[derive(Debug, Clone)]
pub struct AggregatorClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AggregatorClient {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SwapRoutes for AggregatorClient {
    async fn quote(&self, request: QuoteRequest) -> Result<SwapQuote, SwapError> {
        let mode = match request.mode {
            SwapMode::ExactIn => "ExactIn",
            SwapMode::ExactOut => "ExactOut",
        };
        let response = self
            .http
            .get(self.endpoint("/quote"))
            .query(&[
                ("input_mint", request.input_token.to_string()),
                ("output_mint", request.output_token.to_string()),
                ("amount", request.amount.to_string()),
                ("swap_mode", mode.to_string()),
                ("slippage_bps", request.slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(GatewayError::from)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SwapError::NoQuote(format!(
                "no route from {} to {}",
                request.input_token, request.output_token
            )));
        }
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "quote returned {}",
                response.status()
            ))
            .into());
        }

        let route: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("quote invalid JSON: {e}")))?;
        let input_amount = parse_amount_field(&route, "in_amount")?;
        let output_amount = parse_amount_field(&route, "out_amount")?;

        Ok(SwapQuote {
            input_token: request.input_token,
            output_token: request.output_token,
            input_amount,
            output_amount,
            slippage_bps: request.slippage_bps,
            route,
        })
    }

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
        destination_token_account: Option<&Pubkey>,
    ) -> Result<Vec<Instruction>, SwapError> {
        let mut body = json!({
            "quote_response": quote.route,
            "user_public_key": user.to_string(),
        });
        if let Some(destination) = destination_token_account {
            body["destination_token_account"] = json!(destination.to_string());
        }

        let response = self
            .http
            .post(self.endpoint("/swap-instructions"))
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from)?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "swap-instructions returned {}",
                response.status()
            ))
            .into());
        }

        let parsed: SwapInstructionsResponse = response.json().await.map_err(|e| {
            GatewayError::InvalidResponse(format!("swap-instructions invalid JSON: {e}"))
        })?;

        let mut instructions = Vec::new();
        for wire in &parsed.setup_instructions {
            instructions.push(decode_instruction(wire)?);
        }
        instructions.push(decode_instruction(&parsed.swap_instruction)?);
        for wire in &parsed.cleanup_instructions {
            instructions.push(decode_instruction(wire)?);
        }
        Ok(instructions)
    }
}
