//! Routes inbound step messages to the owning worker.
//!
//! One handler per step - the topic decides everything, and each payload is
//! deserialized into its typed shape before any work happens.

use serde_json::Value;
use tracing::debug;

use super::charge::ChargeWorker;
use super::confirm::ConfirmWorker;
use super::credit::CreditWorker;
use super::debit::DebitWorker;
use super::error::SagaError;
use super::messages::parse_message;
use super::payout::PayoutWorker;
use crate::publisher::topics;

pub struct StepDispatcher {
    charge: ChargeWorker,
    confirm: ConfirmWorker,
    credit: CreditWorker,
    debit: DebitWorker,
    payout: PayoutWorker,
}

impl StepDispatcher {
    pub fn new(
        charge: ChargeWorker,
        confirm: ConfirmWorker,
        credit: CreditWorker,
        debit: DebitWorker,
        payout: PayoutWorker,
    ) -> Self {
        Self {
            charge,
            confirm,
            credit,
            debit,
            payout,
        }
    }

    /// Consume exactly one step message.
    pub async fn dispatch(&self, topic: &str, payload: &Value) -> Result<(), SagaError> {
        debug!(topic, "dispatching step message");
        match topic {
            topics::DEPOSIT_INITIATED => self.charge.handle(parse_message(payload)?).await,
            topics::MOBILE_MONEY_CONFIRMATION => {
                self.confirm.handle(parse_message(payload)?).await
            }
            topics::DEPOSIT_CONFIRMED => self.credit.handle(parse_message(payload)?).await,
            topics::WITHDRAWAL_INITIATED => self.debit.handle(parse_message(payload)?).await,
            topics::WITHDRAWAL_LEDGER_DEBITED => self.payout.handle(parse_message(payload)?).await,
            other => Err(SagaError::MalformedMessage(format!(
                "no step handler for topic {other:?}"
            ))),
        }
    }
}
