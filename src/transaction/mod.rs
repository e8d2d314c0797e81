//! Transaction state machine.
//!
//! A transfer between the mobile-money rail and the trading ledger is a
//! long-lived process crossing two independent external systems. This module
//! owns the aggregate for that process: the status FSM, the write-once
//! evidence slots proving each external step, and the domain events drained
//! after each persisted mutation.
//!
//! ```text
//! Deposit:    PENDING -> PROCESSING -> AWAITING_MOBILE_MONEY_CONFIRM
//!                     -> AWAITING_LEDGER_CONFIRM -> COMPLETED
//! Withdrawal: PENDING -> PROCESSING -> AWAITING_LEDGER_CONFIRM
//!                     -> AWAITING_MOBILE_MONEY_PAYOUT -> COMPLETED
//! Any non-terminal state may fail to FAILED; COMPLETED may be REVERSED.
//! ```

pub mod aggregate;
pub mod error;
pub mod state;
pub mod types;

pub use aggregate::Transaction;
pub use error::TransactionError;
pub use state::TxStatus;
pub use types::{
    ChargeEvidence, Direction, DisbursementEvidence, IdempotencyKey, LedgerTransferEvidence,
    TransactionEvent, TransactionId,
};
