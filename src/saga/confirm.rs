//! Deposit step 2: ingest the mobile-money confirmation callback.
//!
//! No gateway call - this step reacts to the provider's inbound message.
//! A success attaches the charge evidence and moves to
//! AWAITING_LEDGER_CONFIRM; a reported user-cancel or handset timeout fails
//! the transaction.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::error::SagaError;
use super::messages::{
    ConfirmationMessage, DepositConfirmedMessage, parse_transaction_id, payload,
};
use super::{publish_failed, reasons};
use crate::mobile_money::result_codes;
use crate::publisher::{Publisher, topics};
use crate::store::TransactionRepository;
use crate::transaction::{ChargeEvidence, Direction, TransactionEvent};

pub struct ConfirmWorker {
    repo: Arc<dyn TransactionRepository>,
    publisher: Arc<dyn Publisher>,
}

impl ConfirmWorker {
    pub fn new(repo: Arc<dyn TransactionRepository>, publisher: Arc<dyn Publisher>) -> Self {
        Self { repo, publisher }
    }

    /// Handle one `mobile-money-confirmation` message.
    pub async fn handle(&self, msg: ConfirmationMessage) -> Result<(), SagaError> {
        let id = parse_transaction_id(&msg.transaction_id)?;
        let Some(mut tx) = self.repo.get(id).await? else {
            return Err(SagaError::NotFound(msg.transaction_id));
        };

        if tx.status().is_terminal() {
            debug!(transaction_id = %id, status = %tx.status(), "terminal transaction, confirmation is a no-op");
            return Ok(());
        }
        if tx.direction() != Direction::Deposit {
            return Err(SagaError::MalformedMessage(format!(
                "confirmation for {} transaction {id}",
                tx.direction()
            )));
        }
        if tx.charge().is_some() {
            debug!(transaction_id = %id, "confirmation already ingested");
            return Ok(());
        }

        let now = Utc::now();

        if msg.result_code != result_codes::SUCCESS {
            warn!(
                transaction_id = %id,
                result_code = msg.result_code,
                result_desc = %msg.result_desc,
                "provider reported charge not completed"
            );
            tx.fail(
                reasons::MOBILE_MONEY_CHARGE_DECLINED,
                Some(msg.result_desc.clone()),
                now,
            )?;
            self.repo.save(&mut tx).await?;
            return publish_failed(self.publisher.as_ref(), &mut tx).await;
        }

        let Some(receipt) = msg.receipt.clone().filter(|r| !r.is_empty()) else {
            return Err(SagaError::MalformedMessage(
                "successful confirmation missing receipt".to_string(),
            ));
        };
        let Some(phone) = msg.phone.clone().filter(|p| !p.is_empty()) else {
            return Err(SagaError::MalformedMessage(
                "successful confirmation missing phone".to_string(),
            ));
        };

        let evidence = ChargeEvidence {
            phone,
            amount_kes_cents: msg.amount_kes_cents.unwrap_or(tx.principal().cents()),
            receipt,
            merchant_request_id: msg.merchant_request_id.clone(),
            checkout_request_id: msg.checkout_request_id.clone(),
            received_at: now,
        };
        tx.confirm_charge(evidence, now)?;
        self.repo.save(&mut tx).await?;

        for event in tx.drain_events() {
            if let TransactionEvent::ChargeConfirmed { receipt } = event {
                self.publisher
                    .publish(
                        topics::DEPOSIT_CONFIRMED,
                        payload(&DepositConfirmedMessage {
                            transaction_id: tx.id().to_string(),
                            receipt,
                        }),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
