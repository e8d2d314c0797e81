//! Wire protocol to the trading-ledger system.
//!
//! JSON objects over one long-lived connection. Every request carries an
//! `op` and a numeric `req_id`; the response echoes the `req_id` with either
//! a `result` object or an `error {code, message}`. The keepalive pair is a
//! reserved shape with no `req_id` and is never correlated.

use serde::{Deserialize, Serialize};

pub const OP_AUTHORIZE: &str = "authorize";
pub const OP_CREDIT_TRANSFER: &str = "credit_transfer";
pub const OP_DEBIT_TRANSFER: &str = "debit_transfer";
pub const OP_PING: &str = "ping";
pub const OP_PONG: &str = "pong";

/// Application error codes the ledger is known to emit.
pub mod error_codes {
    pub const AUTH_INVALID: &str = "AUTH_INVALID";
    pub const AUTH_EXPIRED: &str = "AUTH_EXPIRED";
    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const TRANSFER_REJECTED: &str = "TRANSFER_REJECTED";
}

/// Outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerRequest {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<u64>,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

impl LedgerRequest {
    pub fn call(op: &'static str, req_id: u64, body: serde_json::Value) -> Self {
        Self {
            op,
            req_id: Some(req_id),
            body,
        }
    }

    /// Keepalive ping - reserved shape, no correlation id.
    pub fn ping() -> Self {
        Self {
            op: OP_PING,
            req_id: None,
            body: serde_json::json!({}),
        }
    }
}

/// Inbound response frame.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerResponse {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub req_id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl LedgerResponse {
    /// Keepalive responses are recognized and discarded before any
    /// correlation lookup.
    pub fn is_keepalive(&self) -> bool {
        self.req_id.is_none() && self.op.as_deref() == Some(OP_PONG)
    }
}

/// Application-level error payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// Transfer call parameters, shared by credit and debit.
#[derive(Debug, Clone, Serialize)]
pub struct TransferParams {
    pub account_id: String,
    pub counterparty_account_id: String,
    pub amount_usd_cents: i64,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
}

/// Transfer result payload on success.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    #[serde(default)]
    pub transfer_id: Option<String>,
    #[serde(default)]
    pub txn_id: Option<String>,
    #[serde(default)]
    pub amount_usd_cents: Option<i64>,
}
