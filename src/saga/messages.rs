//! Typed step messages.
//!
//! Every inbound payload is deserialized into one of these shapes at the
//! boundary - untyped maps never travel through the engine. Malformed
//! transaction ids fail fast, before any repository access.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SagaError;
use crate::transaction::TransactionId;

/// First deposit step message, emitted by the initiation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositInitiatedMessage {
    pub transaction_id: String,
    pub phone: String,
}

/// Announcement that the push charge is with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequestedNotice {
    pub transaction_id: String,
    pub phone: String,
    pub amount_kes_cents: i64,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

/// Inbound provider confirmation for a push charge.
///
/// `result_code` 0 is success; anything else is a user cancel, timeout or
/// provider failure described by `result_desc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationMessage {
    pub transaction_id: String,
    pub result_code: i32,
    pub result_desc: String,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub amount_kes_cents: Option<i64>,
}

/// Deposit confirmed; triggers the ledger-credit step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfirmedMessage {
    pub transaction_id: String,
    pub receipt: String,
}

/// First withdrawal step message, emitted by the initiation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalInitiatedMessage {
    pub transaction_id: String,
    pub phone: String,
    /// Secret-store key holding the one-time verification code.
    pub verification_key: String,
}

/// Ledger debited; triggers the mobile-money payout step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDebitedMessage {
    pub transaction_id: String,
    pub phone: String,
    pub provider_transfer_id: String,
}

/// Terminal success announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedNotice {
    pub transaction_id: String,
    pub amount_kes_cents: i64,
    pub amount_usd_cents: i64,
}

/// Terminal failure announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedNotice {
    pub transaction_id: String,
    pub reason: String,
    #[serde(default)]
    pub provider_error: Option<String>,
}

/// Deserialize an inbound payload into its typed shape.
pub fn parse_message<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, SagaError> {
    serde_json::from_value(payload.clone()).map_err(|e| SagaError::MalformedMessage(e.to_string()))
}

/// Parse a transaction id, failing fast on malformed input.
pub fn parse_transaction_id(raw: &str) -> Result<TransactionId, SagaError> {
    raw.parse()
        .map_err(|_| SagaError::MalformedMessage(format!("invalid transaction_id: {raw:?}")))
}

/// Serialize an outbound payload. Plain data structs cannot fail here.
pub fn payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
