//! Saga step workers.
//!
//! Each transfer advances through a fixed sequence of externally-confirmed
//! steps, one worker per step, driven by an at-least-once message consumer.
//! Every handler follows the same shape:
//!
//! 1. parse the transaction id, failing fast on malformed input
//! 2. reload the transaction from the repository (never trust a stale copy)
//! 3. terminal or evidence-already-present: safe no-op
//! 4. check preconditions; a missing one fails the transaction with a
//!    specific reason and stops
//! 5. call the gateway inside a bounded retry loop
//! 6. on success: record evidence, transition, persist, publish the next
//!    step message
//! 7. on exhaustion: fail the transaction with the last provider error and
//!    publish the failure
//!
//! A step is not complete until its save succeeded - persistence errors
//! propagate to the consumer, which redelivers. Within one transaction the
//! reload-before-guard pattern keeps a single step in flight: whichever
//! delivery persists its transition first wins, the loser re-reads and
//! no-ops.
//!
//! ```text
//! Deposit:    initiate -> charge -> confirm -> credit -> COMPLETED
//! Withdrawal: initiate -> debit -> payout -> COMPLETED
//! ```

pub mod charge;
pub mod confirm;
pub mod credit;
pub mod debit;
pub mod dispatcher;
pub mod error;
pub mod initiate;
pub mod messages;
pub mod payout;
pub mod retry;

#[cfg(test)]
mod integration_tests;

pub use charge::ChargeWorker;
pub use confirm::ConfirmWorker;
pub use credit::CreditWorker;
pub use debit::DebitWorker;
pub use dispatcher::StepDispatcher;
pub use error::SagaError;
pub use initiate::{DepositCommand, InitiationLimits, SagaInitiator, WithdrawalCommand};
pub use payout::PayoutWorker;
pub use retry::RetryPolicy;

use crate::publisher::{Publisher, topics};
use crate::transaction::{Direction, Transaction, TransactionEvent};

/// Stable failure reason codes stored on the transaction and carried by
/// `*-failed` messages.
pub mod reasons {
    pub const MOBILE_MONEY_CHARGE_FAILED: &str = "mobile_money_charge_failed";
    pub const MOBILE_MONEY_CHARGE_DECLINED: &str = "mobile_money_charge_declined";
    pub const MISSING_CHARGE_CONFIRMATION: &str = "missing_charge_confirmation";
    pub const LEDGER_ACCOUNT_NOT_CONFIGURED: &str = "ledger_account_not_configured";
    pub const LEDGER_CREDIT_FAILED: &str = "ledger_credit_failed";
    pub const LEDGER_DEBIT_FAILED: &str = "ledger_debit_failed";
    pub const VERIFICATION_CODE_MISSING_OR_EXPIRED: &str = "verification_code_missing_or_expired";
    pub const MISSING_LEDGER_DEBIT: &str = "missing_ledger_debit";
    pub const PAYOUT_RETRIES_EXHAUSTED: &str = "payout_retries_exhausted";
}

/// Publish the terminal failure for a just-failed transaction.
///
/// Drains the aggregate's events, so a replayed message (which records no
/// new events) publishes nothing.
pub(crate) async fn publish_failed(
    publisher: &dyn Publisher,
    tx: &mut Transaction,
) -> Result<(), SagaError> {
    let topic = match tx.direction() {
        Direction::Deposit => topics::DEPOSIT_FAILED,
        Direction::Withdrawal => topics::WITHDRAWAL_FAILED,
    };
    for event in tx.drain_events() {
        if let TransactionEvent::Failed {
            reason,
            provider_error,
        } = event
        {
            publisher
                .publish(
                    topic,
                    messages::payload(&messages::FailedNotice {
                        transaction_id: tx.id().to_string(),
                        reason,
                        provider_error,
                    }),
                )
                .await?;
        }
    }
    Ok(())
}
