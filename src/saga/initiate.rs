//! Saga initiation commands.
//!
//! Validation happens before any side effect: a rejected command creates no
//! row and publishes no message. The idempotency key is checked first -
//! repeating a command with a known key returns the existing transaction
//! untouched and emits nothing.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::error::SagaError;
use super::messages::{DepositInitiatedMessage, WithdrawalInitiatedMessage, payload};
use crate::money::{LockedRate, Money};
use crate::publisher::{Publisher, topics};
use crate::store::TransactionRepository;
use crate::transaction::{IdempotencyKey, Transaction};

/// Per-direction amount limits, checked before creation.
#[derive(Debug, Clone)]
pub struct InitiationLimits {
    pub min_deposit_kes_cents: i64,
    pub max_deposit_kes_cents: i64,
    pub min_withdrawal_usd_cents: i64,
    pub max_withdrawal_usd_cents: i64,
}

impl Default for InitiationLimits {
    fn default() -> Self {
        Self {
            // 10.00 KES .. 250,000.00 KES
            min_deposit_kes_cents: 1_000,
            max_deposit_kes_cents: 25_000_000,
            // 1.00 USD .. 10,000.00 USD
            min_withdrawal_usd_cents: 100,
            max_withdrawal_usd_cents: 1_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositCommand {
    pub user_id: u64,
    pub amount_kes_cents: i64,
    pub phone: String,
    pub idempotency_token: String,
    pub rate: LockedRate,
}

#[derive(Debug, Clone)]
pub struct WithdrawalCommand {
    pub user_id: u64,
    pub amount_usd_cents: i64,
    pub phone: String,
    pub idempotency_token: String,
    /// Secret-store key under which the one-time verification code waits.
    pub verification_key: String,
    pub rate: LockedRate,
}

pub struct SagaInitiator {
    repo: Arc<dyn TransactionRepository>,
    publisher: Arc<dyn Publisher>,
    limits: InitiationLimits,
    idempotency_ttl: chrono::Duration,
}

impl SagaInitiator {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        publisher: Arc<dyn Publisher>,
        limits: InitiationLimits,
    ) -> Self {
        Self {
            repo,
            publisher,
            limits,
            idempotency_ttl: chrono::Duration::hours(24),
        }
    }

    /// Create a PENDING deposit and emit its first step message.
    pub async fn initiate_deposit(&self, cmd: DepositCommand) -> Result<Transaction, SagaError> {
        Self::check_common(cmd.user_id, &cmd.phone, &cmd.idempotency_token)?;
        if cmd.amount_kes_cents < self.limits.min_deposit_kes_cents
            || cmd.amount_kes_cents > self.limits.max_deposit_kes_cents
        {
            return Err(SagaError::Validation(
                "deposit amount outside limits".to_string(),
            ));
        }

        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&cmd.idempotency_token)
            .await?
        {
            info!(
                transaction_id = %existing.id(),
                token = %cmd.idempotency_token,
                "idempotency key already used - returning existing transaction"
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let principal = Money::kes(cmd.amount_kes_cents)?;
        let key = IdempotencyKey::new(cmd.idempotency_token.as_str(), now, self.idempotency_ttl)
            .ok_or_else(|| SagaError::Validation("empty idempotency key".to_string()))?;

        let mut tx = Transaction::deposit(cmd.user_id, principal, cmd.rate, key, now)?;
        self.repo.save(&mut tx).await?;
        tx.drain_events();

        self.publisher
            .publish(
                topics::DEPOSIT_INITIATED,
                payload(&DepositInitiatedMessage {
                    transaction_id: tx.id().to_string(),
                    phone: cmd.phone,
                }),
            )
            .await?;

        info!(transaction_id = %tx.id(), user_id = cmd.user_id, "deposit initiated");
        Ok(tx)
    }

    /// Create a PENDING withdrawal and emit its first step message.
    pub async fn initiate_withdrawal(
        &self,
        cmd: WithdrawalCommand,
    ) -> Result<Transaction, SagaError> {
        Self::check_common(cmd.user_id, &cmd.phone, &cmd.idempotency_token)?;
        if cmd.amount_usd_cents < self.limits.min_withdrawal_usd_cents
            || cmd.amount_usd_cents > self.limits.max_withdrawal_usd_cents
        {
            return Err(SagaError::Validation(
                "withdrawal amount outside limits".to_string(),
            ));
        }
        if cmd.verification_key.trim().is_empty() {
            return Err(SagaError::Validation(
                "missing verification key".to_string(),
            ));
        }

        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&cmd.idempotency_token)
            .await?
        {
            info!(
                transaction_id = %existing.id(),
                token = %cmd.idempotency_token,
                "idempotency key already used - returning existing transaction"
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let principal = Money::usd(cmd.amount_usd_cents)?;
        let key = IdempotencyKey::new(cmd.idempotency_token.as_str(), now, self.idempotency_ttl)
            .ok_or_else(|| SagaError::Validation("empty idempotency key".to_string()))?;

        let mut tx = Transaction::withdrawal(cmd.user_id, principal, cmd.rate, key, now)?;
        self.repo.save(&mut tx).await?;
        tx.drain_events();

        self.publisher
            .publish(
                topics::WITHDRAWAL_INITIATED,
                payload(&WithdrawalInitiatedMessage {
                    transaction_id: tx.id().to_string(),
                    phone: cmd.phone,
                    verification_key: cmd.verification_key,
                }),
            )
            .await?;

        info!(transaction_id = %tx.id(), user_id = cmd.user_id, "withdrawal initiated");
        Ok(tx)
    }

    fn check_common(user_id: u64, phone: &str, token: &str) -> Result<(), SagaError> {
        if user_id == 0 {
            return Err(SagaError::Validation("invalid user id".to_string()));
        }
        if phone.trim().is_empty() {
            return Err(SagaError::Validation("missing phone number".to_string()));
        }
        if token.trim().is_empty() {
            return Err(SagaError::Validation("empty idempotency key".to_string()));
        }
        Ok(())
    }
}
