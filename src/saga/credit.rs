//! Deposit step 3: credit the trading ledger.
//!
//! Requires the mobile-money confirmation evidence and the user's ledger
//! account. Converts the KES principal to USD cents through the locked rate
//! and completes the deposit on success.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::SagaError;
use super::messages::{CompletedNotice, DepositConfirmedMessage, parse_transaction_id, payload};
use super::retry::RetryPolicy;
use super::{publish_failed, reasons};
use crate::ledger::{LedgerGateway, TransferInstruction};
use crate::publisher::{Publisher, topics};
use crate::store::{AccountDirectory, TransactionRepository};
use crate::transaction::{Direction, LedgerTransferEvidence, TransactionEvent};

pub struct CreditWorker {
    repo: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn LedgerGateway>,
    accounts: Arc<dyn AccountDirectory>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
}

impl CreditWorker {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn LedgerGateway>,
        accounts: Arc<dyn AccountDirectory>,
        publisher: Arc<dyn Publisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            gateway,
            accounts,
            publisher,
            retry,
        }
    }

    /// Handle one `deposit-confirmed` message.
    pub async fn handle(&self, msg: DepositConfirmedMessage) -> Result<(), SagaError> {
        let id = parse_transaction_id(&msg.transaction_id)?;
        let Some(mut tx) = self.repo.get(id).await? else {
            return Err(SagaError::NotFound(msg.transaction_id));
        };

        if tx.status().is_terminal() {
            debug!(transaction_id = %id, status = %tx.status(), "terminal transaction, credit step is a no-op");
            return Ok(());
        }
        if tx.direction() != Direction::Deposit {
            return Err(SagaError::MalformedMessage(format!(
                "credit step message for {} transaction {id}",
                tx.direction()
            )));
        }
        if tx.ledger_transfer().is_some() {
            debug!(transaction_id = %id, "ledger credit already recorded");
            return Ok(());
        }

        let now = Utc::now();

        if tx.charge().is_none() {
            tx.fail(reasons::MISSING_CHARGE_CONFIRMATION, None, now)?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        }
        let Some(account) = self.accounts.ledger_account_for(tx.user_id()).await? else {
            warn!(transaction_id = %id, user_id = tx.user_id(), "no ledger account configured");
            tx.fail(reasons::LEDGER_ACCOUNT_NOT_CONFIGURED, None, now)?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        };

        let usd = tx.rate().kes_to_usd(tx.principal())?;
        let instruction = TransferInstruction {
            counterparty_account_id: account,
            amount: usd,
            reference: tx.id().to_string(),
            verification_code: None,
        };

        let gateway = Arc::clone(&self.gateway);
        let result = self
            .retry
            .run("ledger_credit", || {
                let gateway = Arc::clone(&gateway);
                let instruction = instruction.clone();
                async move { gateway.credit(&instruction).await }
            })
            .await;

        match result {
            Ok(outcome) => {
                let now = Utc::now();
                let evidence = LedgerTransferEvidence {
                    account_id: outcome.account_id,
                    counterparty_account_id: outcome.counterparty_account_id,
                    amount_usd_cents: outcome.amount_usd_cents,
                    provider_transfer_id: outcome.provider_transfer_id,
                    provider_txn_id: outcome.provider_txn_id,
                    executed_at: now,
                    raw_payload: outcome.raw_payload,
                };
                let amount_usd_cents = evidence.amount_usd_cents;
                tx.record_ledger_credit(evidence, now)?;
                self.repo.save(&mut tx).await?;

                for event in tx.drain_events() {
                    if matches!(event, TransactionEvent::Completed) {
                        self.publisher
                            .publish(
                                topics::DEPOSIT_COMPLETED,
                                payload(&CompletedNotice {
                                    transaction_id: tx.id().to_string(),
                                    amount_kes_cents: tx.principal().cents(),
                                    amount_usd_cents,
                                }),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "ledger credit failed");
                tx.fail(reasons::LEDGER_CREDIT_FAILED, Some(e.to_string()), Utc::now())?;
                self.repo.save(&mut tx).await?;
                publish_failed(self.publisher.as_ref(), &mut tx).await
            }
        }
    }
}
