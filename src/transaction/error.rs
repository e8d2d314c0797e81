//! Transaction aggregate error types.

use thiserror::Error;

use super::state::TxStatus;
use super::types::Direction;
use crate::money::MoneyError;

/// Errors raised by the transaction aggregate.
///
/// Every guard failure leaves the aggregate untouched: no status change,
/// no evidence written, no event recorded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransactionError {
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: TxStatus, to: TxStatus },

    #[error("transaction is terminal ({0}), no further mutation allowed")]
    Terminal(TxStatus),

    #[error("reverse is only legal from COMPLETED (current: {0})")]
    NotReversible(TxStatus),

    #[error("evidence out of sequence: {0}")]
    EvidenceOutOfSequence(&'static str),

    #[error("conflicting evidence already recorded for slot {0}")]
    EvidenceConflict(&'static str),

    #[error("operation not valid for {0} transactions")]
    WrongDirection(Direction),

    #[error("idempotency key is expired")]
    IdempotencyKeyExpired,

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl TransactionError {
    /// Stable error code for logs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TransactionError::Terminal(_) => "TERMINAL_STATE",
            TransactionError::NotReversible(_) => "NOT_REVERSIBLE",
            TransactionError::EvidenceOutOfSequence(_) => "EVIDENCE_OUT_OF_SEQUENCE",
            TransactionError::EvidenceConflict(_) => "EVIDENCE_CONFLICT",
            TransactionError::WrongDirection(_) => "WRONG_DIRECTION",
            TransactionError::IdempotencyKeyExpired => "IDEMPOTENCY_KEY_EXPIRED",
            TransactionError::Money(MoneyError::CurrencyMismatch { .. }) => "CURRENCY_MISMATCH",
            TransactionError::Money(_) => "INVALID_AMOUNT",
        }
    }
}
