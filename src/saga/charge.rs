//! Deposit step 1: initiate the mobile-money push charge.
//!
//! PENDING -> PROCESSING (persisted before the provider call) ->
//! AWAITING_MOBILE_MONEY_CONFIRM.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::SagaError;
use super::messages::{
    ChargeRequestedNotice, DepositInitiatedMessage, parse_transaction_id, payload,
};
use super::retry::RetryPolicy;
use super::{publish_failed, reasons};
use crate::mobile_money::{ChargeRequest, MobileMoneyClient};
use crate::publisher::{Publisher, topics};
use crate::store::TransactionRepository;
use crate::transaction::{Direction, TransactionEvent, TxStatus};

pub struct ChargeWorker {
    repo: Arc<dyn TransactionRepository>,
    mobile_money: Arc<dyn MobileMoneyClient>,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
}

impl ChargeWorker {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        mobile_money: Arc<dyn MobileMoneyClient>,
        publisher: Arc<dyn Publisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            mobile_money,
            publisher,
            retry,
        }
    }

    /// Handle one `deposit-initiated` message.
    pub async fn handle(&self, msg: DepositInitiatedMessage) -> Result<(), SagaError> {
        let id = parse_transaction_id(&msg.transaction_id)?;
        let Some(mut tx) = self.repo.get(id).await? else {
            return Err(SagaError::NotFound(msg.transaction_id));
        };

        if tx.status().is_terminal() {
            debug!(transaction_id = %id, status = %tx.status(), "terminal transaction, charge step is a no-op");
            return Ok(());
        }
        if tx.direction() != Direction::Deposit {
            return Err(SagaError::MalformedMessage(format!(
                "deposit step message for {} transaction {id}",
                tx.direction()
            )));
        }

        match tx.status() {
            TxStatus::Pending => {
                // Persist PROCESSING before touching the provider.
                tx.transition(TxStatus::Processing, Utc::now())?;
                self.repo.save(&mut tx).await?;
            }
            // Crashed after the PROCESSING save: resume the provider call.
            // The push charge is idempotent on our reference.
            TxStatus::Processing => {}
            _ => {
                debug!(transaction_id = %id, status = %tx.status(), "charge step already applied");
                return Ok(());
            }
        }

        let request = ChargeRequest {
            phone: msg.phone.clone(),
            amount: tx.principal(),
            reference: tx.id().to_string(),
        };
        let client = Arc::clone(&self.mobile_money);
        let result = self
            .retry
            .run("mobile_money_charge", || {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.initiate_charge(&request).await }
            })
            .await;

        match result {
            Ok(handle) => {
                tx.mark_charge_requested(
                    handle.merchant_request_id,
                    handle.checkout_request_id,
                    Utc::now(),
                )?;
                self.repo.save(&mut tx).await?;
                for event in tx.drain_events() {
                    if let TransactionEvent::ChargeRequested {
                        merchant_request_id,
                        checkout_request_id,
                    } = event
                    {
                        self.publisher
                            .publish(
                                topics::DEPOSIT_CHARGE_REQUESTED,
                                payload(&ChargeRequestedNotice {
                                    transaction_id: tx.id().to_string(),
                                    phone: msg.phone.clone(),
                                    amount_kes_cents: tx.principal().cents(),
                                    merchant_request_id,
                                    checkout_request_id,
                                }),
                            )
                            .await?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "mobile-money charge failed");
                tx.fail(
                    reasons::MOBILE_MONEY_CHARGE_FAILED,
                    Some(e.to_string()),
                    Utc::now(),
                )?;
                self.repo.save(&mut tx).await?;
                publish_failed(self.publisher.as_ref(), &mut tx).await
            }
        }
    }
}
