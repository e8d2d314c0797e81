//! Transaction identity, idempotency-key and evidence record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Transaction ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed between workers
/// - 128-bit with good entropy
///
/// Crosses process boundaries as its string form; messages and rows carry
/// the canonical 26-character encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    /// Generate a new unique TransactionId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum Direction {
    /// Mobile money in, ledger credit out
    Deposit = 1,
    /// Ledger debit in, mobile money payout out
    Withdrawal = 2,
}

impl Direction {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Direction::Deposit),
            2 => Some(Direction::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client-supplied token deduplicating saga starts.
///
/// A key maps to at most one transaction; starting a second saga with the
/// same token returns the existing transaction unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyKey {
    token: String,
    expires_at: DateTime<Utc>,
}

impl IdempotencyKey {
    pub fn new(token: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return None;
        }
        Some(Self {
            token,
            expires_at: now + ttl,
        })
    }

    /// Reconstruct from persisted fields.
    pub fn from_parts(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Proof that the mobile-money charge was confirmed by the provider.
///
/// Written once, at confirmation ingestion; the correlation ids come from
/// the provider callback and tie the receipt back to the original push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeEvidence {
    pub phone: String,
    pub amount_kes_cents: i64,
    /// Provider receipt number, e.g. an M-Pesa receipt
    pub receipt: String,
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub received_at: DateTime<Utc>,
}

/// Proof that the trading-ledger transfer executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransferEvidence {
    /// Our ledger account
    pub account_id: String,
    /// The user's trading account
    pub counterparty_account_id: String,
    pub amount_usd_cents: i64,
    pub provider_transfer_id: String,
    pub provider_txn_id: String,
    pub executed_at: DateTime<Utc>,
    /// Full provider response, kept for audit
    pub raw_payload: serde_json::Value,
}

/// Proof that the mobile-money payout settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisbursementEvidence {
    pub conversation_id: String,
    pub originator_conversation_id: String,
    pub amount_kes_cents: i64,
    pub receipt: String,
    pub result_code: i32,
}

/// Domain events recorded by the aggregate and drained exactly once
/// after each successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionEvent {
    Created,
    ChargeRequested {
        merchant_request_id: String,
        checkout_request_id: String,
    },
    ChargeConfirmed {
        receipt: String,
    },
    LedgerDebited {
        provider_transfer_id: String,
    },
    Completed,
    Failed {
        reason: String,
        provider_error: Option<String>,
    },
    Reversed {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_transaction_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<TransactionId>().is_err());
        assert!("".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_transaction_ids_sort_by_creation() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert!(b.inner() >= a.inner());
    }

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::from_id(1), Some(Direction::Deposit));
        assert_eq!(Direction::from_id(2), Some(Direction::Withdrawal));
        assert_eq!(Direction::from_id(0), None);
        assert_eq!(Direction::Deposit.to_string(), "DEPOSIT");
    }

    #[test]
    fn test_idempotency_key() {
        let now = Utc::now();
        let key = IdempotencyKey::new("client-abc", now, Duration::hours(24)).unwrap();
        assert_eq!(key.token(), "client-abc");
        assert!(!key.is_expired(now));
        assert!(key.is_expired(now + Duration::hours(25)));

        assert!(IdempotencyKey::new("", now, Duration::hours(1)).is_none());
        assert!(IdempotencyKey::new("   ", now, Duration::hours(1)).is_none());
    }
}
