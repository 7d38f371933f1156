// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Settlement executor: builds, signs, submits and confirms on-chain
//! transactions.
//!
//! The executor is the only component that mutates the user's root wallet
//! and deposit account. Callers serialize access per user through the
//! session registry, so no two settlements for the same wallet are ever in
//! flight at once. Submission failures are retried with fixed backoff and a
//! fresh blockhash per attempt; confirmation is a bounded poll.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Keypair, signer::Signer,
    transaction::Transaction,
};
use tracing::{debug, info};

use crate::error::SettlementError;
use crate::gateway::rpc::ExecutionEndpoint;
use crate::models::{SettlementReceipt, STABLECOIN_DECIMALS};
use crate::retry::{self, RetryPolicy};

/// Fixed submission retry budget.
const SUBMIT_MAX_ATTEMPTS: u32 = 3;
const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Confirmation poll budget.
const CONFIRM_MAX_POLLS: u32 = 30;
const CONFIRM_POLL_DELAY: Duration = Duration::from_secs(1);

pub struct SettlementExecutor {
    endpoint: Arc<dyn ExecutionEndpoint>,
    /// Root wallet key: fee payer and authority over intermediate token
    /// accounts.
    fee_payer: Arc<Keypair>,
    submit_policy: RetryPolicy,
    confirm_policy: RetryPolicy,
}

impl SettlementExecutor {
    pub fn new(endpoint: Arc<dyn ExecutionEndpoint>, fee_payer: Arc<Keypair>) -> Self {
        Self {
            endpoint,
            fee_payer,
            submit_policy: RetryPolicy::new(SUBMIT_MAX_ATTEMPTS, SUBMIT_RETRY_DELAY),
            confirm_policy: RetryPolicy::new(CONFIRM_MAX_POLLS, CONFIRM_POLL_DELAY),
        }
    }

    /// Override the retry budgets, mainly for tests.
    pub fn with_policies(mut self, submit: RetryPolicy, confirm: RetryPolicy) -> Self {
        self.submit_policy = submit;
        self.confirm_policy = confirm;
        self
    }

    pub fn fee_payer_pubkey(&self) -> Pubkey {
        self.fee_payer.pubkey()
    }

    /// Sign and submit `instructions` as one atomic transaction, then wait
    /// for confirmation. Each submission attempt re-fetches the blockhash
    /// and re-signs.
    pub async fn execute(
        &self,
        instructions: Vec<Instruction>,
        confirmed_amount: u64,
    ) -> Result<SettlementReceipt, SettlementError> {
        let endpoint = Arc::clone(&self.endpoint);
        let fee_payer = Arc::clone(&self.fee_payer);
        let signature = retry::bounded(
            self.submit_policy,
            SettlementError::is_transient,
            move || {
                let endpoint = Arc::clone(&endpoint);
                let fee_payer = Arc::clone(&fee_payer);
                let instructions = instructions.clone();
                async move {
                    let blockhash = endpoint
                        .latest_blockhash()
                        .await
                        .map_err(SettlementError::from)?;
                    let tx = Transaction::new_signed_with_payer(
                        &instructions,
                        Some(&fee_payer.pubkey()),
                        &[fee_payer.as_ref()],
                        blockhash,
                    );
                    endpoint
                        .submit(&tx)
                        .await
                        .map_err(|e| SettlementError::Submission(e.to_string()))
                }
            },
        )
        .await?;

        debug!(signature = %signature, "transaction submitted, awaiting confirmation");
        self.confirm(&signature).await?;
        info!(signature = %signature, confirmed_amount, "settlement confirmed");
        Ok(SettlementReceipt {
            signature,
            confirmed_amount,
        })
    }

    /// Transfer instruction from an intermediate account to the deposit
    /// account, for appending to a swap transaction.
    pub fn deposit_transfer_instruction(
        &self,
        source_token_account: &Pubkey,
        stablecoin_mint: &Pubkey,
        deposit_account: &Pubkey,
        amount_base: u64,
    ) -> Result<Instruction, SettlementError> {
        spl_token::instruction::transfer_checked(
            &spl_token::id(),
            source_token_account,
            stablecoin_mint,
            deposit_account,
            &self.fee_payer.pubkey(),
            &[],
            amount_base,
            STABLECOIN_DECIMALS,
        )
        .map_err(|e| SettlementError::Encoding(e.to_string()))
    }

    /// Idempotent "create destination token account if missing"
    /// instruction for `owner`/`mint`.
    pub fn create_token_account_instruction(&self, owner: &Pubkey, mint: &Pubkey) -> Instruction {
        spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            &self.fee_payer.pubkey(),
            owner,
            mint,
            &spl_token::id(),
        )
    }

    async fn confirm(&self, signature: &str) -> Result<(), SettlementError> {
        let endpoint = Arc::clone(&self.endpoint);
        let sig = signature.to_string();
        retry::bounded(
            self.confirm_policy,
            |e: &SettlementError| matches!(e, SettlementError::ConfirmationTimeout { .. }),
            move || {
                let endpoint = Arc::clone(&endpoint);
                let sig = sig.clone();
                async move {
                    match endpoint.is_confirmed(&sig).await {
                        Ok(true) => Ok(()),
                        Ok(false) => Err(SettlementError::ConfirmationTimeout { signature: sig }),
                        // An on-chain failure is permanent, never re-polled.
                        Err(e) => Err(SettlementError::Gateway(e)),
                    }
                }
            },
        )
        .await
    }
}
