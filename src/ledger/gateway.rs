//! Step gateways: domain-shaped credit/debit calls over the RPC client.
//!
//! Each gateway call issues exactly one RPC call and translates the
//! response back into a domain result. A success flag plus the required
//! transfer identifiers maps to a confirmed outcome; known application
//! error codes map to stable domain messages; everything else passes the
//! provider message through verbatim. A missing identifier on an otherwise
//! successful response is itself a failure, never a success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::client::LedgerRpcClient;
use super::error::GatewayError;
use super::protocol::{
    OP_CREDIT_TRANSFER, OP_DEBIT_TRANSFER, TransferParams, TransferResult, error_codes,
};
use crate::money::Money;

/// Domain-shaped transfer call.
#[derive(Debug, Clone)]
pub struct TransferInstruction {
    /// The user's trading account on the ledger side.
    pub counterparty_account_id: String,
    /// USD amount to move.
    pub amount: Money,
    /// Our reference, echoed back by the ledger (the transaction id).
    pub reference: String,
    /// One-time verification code, required for debits.
    pub verification_code: Option<String>,
}

/// Confirmed transfer: the amount the ledger executed, both account
/// identifiers, and both provider ids.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub account_id: String,
    pub counterparty_account_id: String,
    pub amount_usd_cents: i64,
    pub provider_transfer_id: String,
    pub provider_txn_id: String,
    /// Full response payload, kept as audit evidence.
    pub raw_payload: serde_json::Value,
}

/// The ledger gateway pair consumed by the saga workers.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Credit the counterparty account (deposits).
    async fn credit(&self, instruction: &TransferInstruction)
    -> Result<TransferOutcome, GatewayError>;

    /// Debit the counterparty account (withdrawals).
    async fn debit(&self, instruction: &TransferInstruction)
    -> Result<TransferOutcome, GatewayError>;
}

/// RPC-backed gateway.
pub struct RpcLedgerGateway {
    client: Arc<LedgerRpcClient>,
    /// Our own ledger account, the fixed side of every transfer.
    account_id: String,
    call_timeout: Option<Duration>,
}

impl RpcLedgerGateway {
    pub fn new(client: Arc<LedgerRpcClient>, account_id: String) -> Self {
        Self {
            client,
            account_id,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    async fn transfer(
        &self,
        op: &'static str,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, GatewayError> {
        let params = TransferParams {
            account_id: self.account_id.clone(),
            counterparty_account_id: instruction.counterparty_account_id.clone(),
            amount_usd_cents: instruction.amount.cents(),
            reference: instruction.reference.clone(),
            verification_code: instruction.verification_code.clone(),
        };
        let body = serde_json::to_value(&params)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!(op, reference = %instruction.reference, "issuing ledger transfer");
        let raw = self
            .client
            .call(op, body, self.call_timeout)
            .await
            .map_err(rewrite_rejection)?;

        parse_transfer_outcome(raw, &self.account_id, instruction)
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    async fn credit(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, GatewayError> {
        self.transfer(OP_CREDIT_TRANSFER, instruction).await
    }

    async fn debit(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferOutcome, GatewayError> {
        self.transfer(OP_DEBIT_TRANSFER, instruction).await
    }
}

/// Map known application error codes to stable domain messages; unknown
/// codes keep the provider message verbatim.
fn rewrite_rejection(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Rejected { code, message } => {
            let message = match code.as_str() {
                error_codes::AUTH_INVALID | error_codes::AUTH_EXPIRED => {
                    "invalid or expired ledger authorization".to_string()
                }
                error_codes::INSUFFICIENT_BALANCE => "insufficient ledger balance".to_string(),
                error_codes::TRANSFER_REJECTED => "ledger transfer rejected".to_string(),
                _ => message,
            };
            GatewayError::Rejected { code, message }
        }
        other => other,
    }
}

/// Translate a raw success payload into a confirmed outcome.
fn parse_transfer_outcome(
    raw: serde_json::Value,
    account_id: &str,
    instruction: &TransferInstruction,
) -> Result<TransferOutcome, GatewayError> {
    let result: TransferResult = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

    if !result.success {
        return Err(GatewayError::Rejected {
            code: error_codes::TRANSFER_REJECTED.to_string(),
            message: "ledger transfer rejected".to_string(),
        });
    }

    let provider_transfer_id = result.transfer_id.filter(|id| !id.is_empty()).ok_or_else(|| {
        GatewayError::MalformedResponse("successful response missing transfer_id".to_string())
    })?;
    let provider_txn_id = result.txn_id.filter(|id| !id.is_empty()).ok_or_else(|| {
        GatewayError::MalformedResponse("successful response missing txn_id".to_string())
    })?;

    Ok(TransferOutcome {
        account_id: account_id.to_string(),
        counterparty_account_id: instruction.counterparty_account_id.clone(),
        amount_usd_cents: result
            .amount_usd_cents
            .unwrap_or(instruction.amount.cents()),
        provider_transfer_id,
        provider_txn_id,
        raw_payload: raw,
    })
}

/// Scripted mock gateway for tests.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MockLedgerGateway {
        credit_outcomes: Mutex<VecDeque<Result<TransferOutcome, GatewayError>>>,
        debit_outcomes: Mutex<VecDeque<Result<TransferOutcome, GatewayError>>>,
        credit_calls: AtomicUsize,
        debit_calls: AtomicUsize,
    }

    impl MockLedgerGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_credit_outcome(&self, outcome: Result<TransferOutcome, GatewayError>) {
            self.credit_outcomes.lock().unwrap().push_back(outcome);
        }

        pub fn push_debit_outcome(&self, outcome: Result<TransferOutcome, GatewayError>) {
            self.debit_outcomes.lock().unwrap().push_back(outcome);
        }

        pub fn credit_calls(&self) -> usize {
            self.credit_calls.load(Ordering::SeqCst)
        }

        pub fn debit_calls(&self) -> usize {
            self.debit_calls.load(Ordering::SeqCst)
        }

        fn default_outcome(instruction: &TransferInstruction) -> TransferOutcome {
            TransferOutcome {
                account_id: "bridge-main".to_string(),
                counterparty_account_id: instruction.counterparty_account_id.clone(),
                amount_usd_cents: instruction.amount.cents(),
                provider_transfer_id: format!("tr-{}", instruction.reference),
                provider_txn_id: format!("txn-{}", instruction.reference),
                raw_payload: serde_json::json!({"success": true}),
            }
        }
    }

    #[async_trait]
    impl LedgerGateway for MockLedgerGateway {
        async fn credit(
            &self,
            instruction: &TransferInstruction,
        ) -> Result<TransferOutcome, GatewayError> {
            self.credit_calls.fetch_add(1, Ordering::SeqCst);
            self.credit_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::default_outcome(instruction)))
        }

        async fn debit(
            &self,
            instruction: &TransferInstruction,
        ) -> Result<TransferOutcome, GatewayError> {
            self.debit_calls.fetch_add(1, Ordering::SeqCst);
            self.debit_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::default_outcome(instruction)))
        }
    }
}

#[cfg(test)]
pub use mock::MockLedgerGateway;
