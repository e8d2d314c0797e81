//! The transaction aggregate.
//!
//! One row per transfer, mutated only by saga step workers, one step at a
//! time. Every mutation is guarded: illegal transitions, out-of-sequence
//! evidence and terminal-state writes are rejected without touching the
//! aggregate. Evidence slots are write-once; replaying a step with identical
//! evidence is a no-op so at-least-once delivery is safe.

use chrono::{DateTime, Utc};

use super::error::TransactionError;
use super::state::TxStatus;
use super::types::{
    ChargeEvidence, Direction, DisbursementEvidence, IdempotencyKey, LedgerTransferEvidence,
    TransactionEvent, TransactionId,
};
use crate::money::{Currency, LockedRate, Money};

#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    user_id: u64,
    direction: Direction,
    /// Deposits: the KES amount charged on the mobile-money rail.
    /// Withdrawals: the USD amount debited from the trading ledger.
    principal: Money,
    rate: LockedRate,
    idempotency_key: IdempotencyKey,
    status: TxStatus,
    charge: Option<ChargeEvidence>,
    ledger_transfer: Option<LedgerTransferEvidence>,
    disbursement: Option<DisbursementEvidence>,
    fail_reason: Option<String>,
    provider_error: Option<String>,
    retry_count: u32,
    /// Optimistic concurrency token, bumped by the repository on save.
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Not-yet-delivered domain events, cleared atomically by `drain_events`.
    events: Vec<TransactionEvent>,
}

impl Transaction {
    /// Create a deposit saga: mobile money in, ledger credit out.
    ///
    /// The principal must be denominated in KES - the currency actually
    /// charged on the mobile-money rail.
    pub fn deposit(
        user_id: u64,
        principal: Money,
        rate: LockedRate,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Self, TransactionError> {
        principal.expect_currency(Currency::Kes)?;
        Self::create(user_id, Direction::Deposit, principal, rate, idempotency_key, now)
    }

    /// Create a withdrawal saga: ledger debit in, mobile money payout out.
    ///
    /// The principal must be denominated in USD - the currency debited
    /// from the trading ledger.
    pub fn withdrawal(
        user_id: u64,
        principal: Money,
        rate: LockedRate,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Self, TransactionError> {
        principal.expect_currency(Currency::Usd)?;
        Self::create(user_id, Direction::Withdrawal, principal, rate, idempotency_key, now)
    }

    fn create(
        user_id: u64,
        direction: Direction,
        principal: Money,
        rate: LockedRate,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Self, TransactionError> {
        if idempotency_key.is_expired(now) {
            return Err(TransactionError::IdempotencyKeyExpired);
        }
        rate.ensure_valid(now)?;

        Ok(Self {
            id: TransactionId::new(),
            user_id,
            direction,
            principal,
            rate,
            idempotency_key,
            status: TxStatus::Pending,
            charge: None,
            ledger_transfer: None,
            disbursement: None,
            fail_reason: None,
            provider_error: None,
            retry_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
            events: vec![TransactionEvent::Created],
        })
    }

    /// Rebuild an aggregate from its persisted fields.
    ///
    /// This is the only rehydration path - the mapping layer passes every
    /// column through here instead of reaching past the constructor. No
    /// events are recorded: rehydration is not a domain action.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: TransactionId,
        user_id: u64,
        direction: Direction,
        principal: Money,
        rate: LockedRate,
        idempotency_key: IdempotencyKey,
        status: TxStatus,
        charge: Option<ChargeEvidence>,
        ledger_transfer: Option<LedgerTransferEvidence>,
        disbursement: Option<DisbursementEvidence>,
        fail_reason: Option<String>,
        provider_error: Option<String>,
        retry_count: u32,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            direction,
            principal,
            rate,
            idempotency_key,
            status,
            charge,
            ledger_transfer,
            disbursement,
            fail_reason,
            provider_error,
            retry_count,
            version,
            created_at,
            updated_at,
            events: Vec::new(),
        }
    }

    // === Accessors ===

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn principal(&self) -> Money {
        self.principal
    }

    pub fn rate(&self) -> &LockedRate {
        &self.rate
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn charge(&self) -> Option<&ChargeEvidence> {
        self.charge.as_ref()
    }

    pub fn ledger_transfer(&self) -> Option<&LedgerTransferEvidence> {
        self.ledger_transfer.as_ref()
    }

    pub fn disbursement(&self) -> Option<&DisbursementEvidence> {
        self.disbursement.as_ref()
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    pub fn provider_error(&self) -> Option<&str> {
        self.provider_error.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    // === Guarded mutations ===

    /// Move to `to` if the transition table allows it. Illegal transitions
    /// fail and mutate nothing.
    pub fn transition(&mut self, to: TxStatus, now: DateTime<Utc>) -> Result<(), TransactionError> {
        if !TxStatus::can_transition(self.status, to) {
            return Err(TransactionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Deposit step 1 result: the push charge is with the provider, we now
    /// wait for the confirmation callback.
    pub fn mark_charge_requested(
        &mut self,
        merchant_request_id: String,
        checkout_request_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.expect_direction(Direction::Deposit)?;
        self.transition(TxStatus::AwaitingMobileMoneyConfirm, now)?;
        self.events.push(TransactionEvent::ChargeRequested {
            merchant_request_id,
            checkout_request_id,
        });
        Ok(())
    }

    /// Deposit step 2: attach the confirmed mobile-money charge.
    ///
    /// Replaying the identical evidence is a no-op; conflicting evidence for
    /// the occupied slot is an error.
    pub fn confirm_charge(
        &mut self,
        evidence: ChargeEvidence,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.expect_direction(Direction::Deposit)?;
        match &self.charge {
            Some(existing) if *existing == evidence => return Ok(()),
            Some(_) => return Err(TransactionError::EvidenceConflict("mobile_money_charge")),
            None => {}
        }
        self.transition(TxStatus::AwaitingLedgerConfirm, now)?;
        self.events.push(TransactionEvent::ChargeConfirmed {
            receipt: evidence.receipt.clone(),
        });
        self.charge = Some(evidence);
        Ok(())
    }

    /// Deposit step 3: the ledger credit executed, the saga is complete.
    ///
    /// Evidence ordering mirrors transition ordering: a ledger transfer
    /// cannot land before the mobile-money confirmation.
    pub fn record_ledger_credit(
        &mut self,
        evidence: LedgerTransferEvidence,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.expect_direction(Direction::Deposit)?;
        match &self.ledger_transfer {
            Some(existing) if *existing == evidence => return Ok(()),
            Some(_) => return Err(TransactionError::EvidenceConflict("ledger_transfer")),
            None => {}
        }
        if self.charge.is_none() {
            return Err(TransactionError::EvidenceOutOfSequence(
                "ledger transfer before mobile-money confirmation",
            ));
        }
        self.transition(TxStatus::Completed, now)?;
        self.ledger_transfer = Some(evidence);
        self.events.push(TransactionEvent::Completed);
        Ok(())
    }

    /// Withdrawal step 1: the ledger debit executed; the aggregate stays
    /// non-terminal until the mobile-money payout settles.
    pub fn record_ledger_debit(
        &mut self,
        evidence: LedgerTransferEvidence,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.expect_direction(Direction::Withdrawal)?;
        match &self.ledger_transfer {
            Some(existing) if *existing == evidence => return Ok(()),
            Some(_) => return Err(TransactionError::EvidenceConflict("ledger_transfer")),
            None => {}
        }
        self.transition(TxStatus::AwaitingMobileMoneyPayout, now)?;
        self.events.push(TransactionEvent::LedgerDebited {
            provider_transfer_id: evidence.provider_transfer_id.clone(),
        });
        self.ledger_transfer = Some(evidence);
        Ok(())
    }

    /// Withdrawal step 2: the mobile-money payout settled.
    pub fn settle_payout(
        &mut self,
        evidence: DisbursementEvidence,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.expect_direction(Direction::Withdrawal)?;
        match &self.disbursement {
            Some(existing) if *existing == evidence => return Ok(()),
            Some(_) => return Err(TransactionError::EvidenceConflict("disbursement")),
            None => {}
        }
        if self.ledger_transfer.is_none() {
            return Err(TransactionError::EvidenceOutOfSequence(
                "disbursement before ledger debit",
            ));
        }
        self.transition(TxStatus::Completed, now)?;
        self.disbursement = Some(evidence);
        self.events.push(TransactionEvent::Completed);
        Ok(())
    }

    /// Terminal failure with a stable reason code and the last provider error.
    /// Rejected on an already-terminal transaction.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        provider_error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        if self.status.is_terminal() {
            return Err(TransactionError::Terminal(self.status));
        }
        self.transition(TxStatus::Failed, now)?;
        let reason = reason.into();
        self.fail_reason = Some(reason.clone());
        self.provider_error = provider_error.clone();
        self.events.push(TransactionEvent::Failed {
            reason,
            provider_error,
        });
        Ok(())
    }

    /// Reverse a completed transfer. Only legal from COMPLETED.
    pub fn reverse(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        if self.status != TxStatus::Completed {
            return Err(TransactionError::NotReversible(self.status));
        }
        self.transition(TxStatus::Reversed, now)?;
        let reason = reason.into();
        self.events.push(TransactionEvent::Reversed { reason });
        Ok(())
    }

    /// Bump the retry counter for a retryable payout failure. The
    /// transaction stays in its current state and is re-driven by the next
    /// delivery.
    pub fn note_payout_retry(&mut self, now: DateTime<Utc>) -> u32 {
        self.retry_count += 1;
        self.updated_at = now;
        self.retry_count
    }

    /// Take every event recorded since the last drain, exactly once.
    /// A second drain before new events occur returns empty.
    pub fn drain_events(&mut self) -> Vec<TransactionEvent> {
        std::mem::take(&mut self.events)
    }

    fn expect_direction(&self, expected: Direction) -> Result<(), TransactionError> {
        if self.direction != expected {
            return Err(TransactionError::WrongDirection(self.direction));
        }
        Ok(())
    }
}
