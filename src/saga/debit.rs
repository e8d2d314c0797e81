//! Withdrawal step 1: debit the trading ledger.
//!
//! Consumes the one-time verification code from the secret store - the
//! fetch is destructive, so a replay that reaches it finds nothing and
//! fails the transaction. The AWAITING_LEDGER_CONFIRM state is persisted
//! before the RPC call; a crash mid-call resumes from there.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::SagaError;
use super::messages::{
    LedgerDebitedMessage, WithdrawalInitiatedMessage, parse_transaction_id, payload,
};
use super::retry::RetryPolicy;
use super::{publish_failed, reasons};
use crate::ledger::{LedgerGateway, TransferInstruction};
use crate::publisher::{Publisher, topics};
use crate::store::{AccountDirectory, SecretStore, TransactionRepository};
use crate::transaction::{Direction, LedgerTransferEvidence, TransactionEvent, TxStatus};

pub struct DebitWorker {
    repo: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn LedgerGateway>,
    accounts: Arc<dyn AccountDirectory>,
    secrets: Arc<dyn SecretStore>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
}

impl DebitWorker {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn LedgerGateway>,
        accounts: Arc<dyn AccountDirectory>,
        secrets: Arc<dyn SecretStore>,
        publisher: Arc<dyn Publisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            gateway,
            accounts,
            secrets,
            publisher,
            retry,
        }
    }

    /// Handle one `withdrawal-initiated` message.
    pub async fn handle(&self, msg: WithdrawalInitiatedMessage) -> Result<(), SagaError> {
        let id = parse_transaction_id(&msg.transaction_id)?;
        let Some(mut tx) = self.repo.get(id).await? else {
            return Err(SagaError::NotFound(msg.transaction_id));
        };

        if tx.status().is_terminal() {
            debug!(transaction_id = %id, status = %tx.status(), "terminal transaction, debit step is a no-op");
            return Ok(());
        }
        if tx.direction() != Direction::Withdrawal {
            return Err(SagaError::MalformedMessage(format!(
                "withdrawal step message for {} transaction {id}",
                tx.direction()
            )));
        }
        if tx.ledger_transfer().is_some() {
            debug!(transaction_id = %id, "ledger debit already recorded");
            return Ok(());
        }

        let now = Utc::now();
        match tx.status() {
            TxStatus::Pending => {
                // Persist AWAITING_LEDGER_CONFIRM before the RPC call.
                tx.transition(TxStatus::Processing, now)?;
                tx.transition(TxStatus::AwaitingLedgerConfirm, now)?;
                self.repo.save(&mut tx).await?;
            }
            TxStatus::Processing => {
                tx.transition(TxStatus::AwaitingLedgerConfirm, now)?;
                self.repo.save(&mut tx).await?;
            }
            // Crashed after the save: resume the call.
            TxStatus::AwaitingLedgerConfirm => {}
            _ => {
                debug!(transaction_id = %id, status = %tx.status(), "debit step already applied");
                return Ok(());
            }
        }

        let Some(account) = self.accounts.ledger_account_for(tx.user_id()).await? else {
            warn!(transaction_id = %id, user_id = tx.user_id(), "no ledger account configured");
            tx.fail(reasons::LEDGER_ACCOUNT_NOT_CONFIGURED, None, now)?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        };

        // Single-use fetch. A second invocation for the same key gets
        // nothing and the transaction fails here.
        let Some(code) = self.secrets.get_and_delete(&msg.verification_key).await? else {
            warn!(
                transaction_id = %id,
                verification_key = %msg.verification_key,
                "verification code missing or expired"
            );
            tx.fail(reasons::VERIFICATION_CODE_MISSING_OR_EXPIRED, None, now)?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        };

        let instruction = TransferInstruction {
            counterparty_account_id: account,
            amount: tx.principal(),
            reference: tx.id().to_string(),
            verification_code: Some(code),
        };

        let gateway = Arc::clone(&self.gateway);
        let result = self
            .retry
            .run("ledger_debit", || {
                let gateway = Arc::clone(&gateway);
                let instruction = instruction.clone();
                async move { gateway.debit(&instruction).await }
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
                tx.record_ledger_debit(evidence, now)?;
                self.repo.save(&mut tx).await?;

                for event in tx.drain_events() {
                    if let TransactionEvent::LedgerDebited {
                        provider_transfer_id,
                    } = event
                    {
                        self.publisher
                            .publish(
                                topics::WITHDRAWAL_LEDGER_DEBITED,
                                payload(&LedgerDebitedMessage {
                                    transaction_id: tx.id().to_string(),
                                    phone: msg.phone.clone(),
                                    provider_transfer_id,
                                }),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "ledger debit failed");
                tx.fail(reasons::LEDGER_DEBIT_FAILED, Some(e.to_string()), Utc::now())?;
                self.repo.save(&mut tx).await?;
                publish_failed(self.publisher.as_ref(), &mut tx).await
            }
        }
    }
}
