//! Withdrawal step 2: disburse to the customer's handset.
//!
//! Requires the ledger-debit evidence and the locked rate: the USD
//! principal converts to KES cents, rounded half up. A retryable failure
//! bumps the retry counter and leaves the transaction in
//! AWAITING_MOBILE_MONEY_PAYOUT for the next delivery; once the counter
//! reaches the maximum the transaction fails for good.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::SagaError;
use super::messages::{CompletedNotice, LedgerDebitedMessage, parse_transaction_id, payload};
use super::retry::RetryPolicy;
use super::{publish_failed, reasons};
use crate::mobile_money::{MobileMoneyClient, PayoutRequest};
use crate::publisher::{Publisher, topics};
use crate::store::TransactionRepository;
use crate::transaction::{Direction, DisbursementEvidence, TransactionEvent};

pub struct PayoutWorker {
    repo: Arc<dyn TransactionRepository>,
    mobile_money: Arc<dyn MobileMoneyClient>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    max_payout_retries: u32,
}

impl PayoutWorker {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        mobile_money: Arc<dyn MobileMoneyClient>,
        publisher: Arc<dyn Publisher>,
        retry: RetryPolicy,
        max_payout_retries: u32,
    ) -> Self {
        Self {
            repo,
            mobile_money,
            publisher,
            retry,
            max_payout_retries: max_payout_retries.max(1),
        }
    }

    /// Handle one `withdrawal-ledger-debited` message.
    pub async fn handle(&self, msg: LedgerDebitedMessage) -> Result<(), SagaError> {
        let id = parse_transaction_id(&msg.transaction_id)?;
        let Some(mut tx) = self.repo.get(id).await? else {
            return Err(SagaError::NotFound(msg.transaction_id));
        };

        if tx.status().is_terminal() {
            debug!(transaction_id = %id, status = %tx.status(), "terminal transaction, payout step is a no-op");
            return Ok(());
        }
        if tx.direction() != Direction::Withdrawal {
            return Err(SagaError::MalformedMessage(format!(
                "payout step message for {} transaction {id}",
                tx.direction()
            )));
        }
        if tx.disbursement().is_some() {
            debug!(transaction_id = %id, "payout already settled");
            return Ok(());
        }

        let now = Utc::now();
        if tx.ledger_transfer().is_none() {
            tx.fail(reasons::MISSING_LEDGER_DEBIT, None, now)?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        }

        let kes = tx.rate().usd_to_kes(tx.principal())?;
        let request = PayoutRequest {
            phone: msg.phone.clone(),
            amount: kes,
            reference: tx.id().to_string(),
        };

        let client = Arc::clone(&self.mobile_money);
        let result = self
            .retry
            .run("mobile_money_payout", || {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.payout(&request).await }
            })
            .await;

        match result {
            Ok(receipt) => {
                let now = Utc::now();
                let evidence = DisbursementEvidence {
                    conversation_id: receipt.conversation_id,
                    originator_conversation_id: receipt.originator_conversation_id,
                    amount_kes_cents: kes.cents(),
                    receipt: receipt.receipt,
                    result_code: receipt.result_code,
                };
                tx.settle_payout(evidence, now)?;
                self.repo.save(&mut tx).await?;

                for event in tx.drain_events() {
                    if matches!(event, TransactionEvent::Completed) {
                        self.publisher
                            .publish(
                                topics::WITHDRAWAL_COMPLETED,
                                payload(&CompletedNotice {
                                    transaction_id: tx.id().to_string(),
                                    amount_kes_cents: kes.cents(),
                                    amount_usd_cents: tx.principal().cents(),
                                }),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                let now = Utc::now();
                let attempts = tx.note_payout_retry(now);
                if attempts >= self.max_payout_retries {
                    warn!(
                        transaction_id = %id,
                        attempts,
                        error = %e,
                        "payout retries exhausted"
                    );
                    tx.fail(reasons::PAYOUT_RETRIES_EXHAUSTED, Some(e.to_string()), now)?;
                    self.repo.save(&mut tx).await?;
                    publish_failed(self.publisher.as_ref(), &mut tx).await
                } else {
                    warn!(
                        transaction_id = %id,
                        attempts,
                        error = %e,
                        "payout failed, transaction left retryable"
                    );
                    self.repo.save(&mut tx).await?;
                    tx.drain_events();
                    Ok(())
                }
            }
        }
    }
}
