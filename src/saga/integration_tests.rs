//! End-to-end saga tests over in-memory collaborators.
//!
//! Each test drives real workers against the memory repository, the mock
//! gateways and the capturing publisher - the same wiring as production
//! minus the network.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use super::charge::ChargeWorker;
use super::confirm::ConfirmWorker;
use super::credit::CreditWorker;
use super::debit::DebitWorker;
use super::dispatcher::StepDispatcher;
use super::error::SagaError;
use super::initiate::{DepositCommand, InitiationLimits, SagaInitiator, WithdrawalCommand};
use super::messages::{
    ConfirmationMessage, DepositConfirmedMessage, DepositInitiatedMessage, LedgerDebitedMessage,
    WithdrawalInitiatedMessage,
};
use super::payout::PayoutWorker;
use super::reasons;
use super::retry::RetryPolicy;
use crate::ledger::GatewayError;
use crate::ledger::gateway::MockLedgerGateway;
use crate::mobile_money::{MobileMoneyError, MockMobileMoneyClient, result_codes};
use crate::money::LockedRate;
use crate::publisher::{MemoryPublisher, topics};
use crate::store::{
    MemoryAccountDirectory, MemorySecretStore, MemoryTransactionRepository, SecretStore,
    TransactionRepository,
};
use crate::transaction::{Transaction, TransactionId, TxStatus};

const USER_ID: u64 = 1001;
const PHONE: &str = "254700000001";

struct Harness {
    repo: Arc<MemoryTransactionRepository>,
    publisher: Arc<MemoryPublisher>,
    mobile_money: Arc<MockMobileMoneyClient>,
    gateway: Arc<MockLedgerGateway>,
    secrets: Arc<MemorySecretStore>,
    initiator: SagaInitiator,
    charge: ChargeWorker,
    confirm: ConfirmWorker,
    credit: CreditWorker,
    debit: DebitWorker,
    payout: PayoutWorker,
}

impl Harness {
    async fn new() -> Self {
        Self::with_payout_retries(3).await
    }

    async fn with_payout_retries(max_payout_retries: u32) -> Self {
        let repo = Arc::new(MemoryTransactionRepository::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let mobile_money = Arc::new(MockMobileMoneyClient::new());
        let gateway = Arc::new(MockLedgerGateway::new());
        let accounts = Arc::new(MemoryAccountDirectory::new());
        let secrets = Arc::new(MemorySecretStore::new());
        accounts.insert(USER_ID, "trader-1001").await;

        let retry = RetryPolicy::new(3, Duration::from_millis(1));

        Self {
            initiator: SagaInitiator::new(
                repo.clone(),
                publisher.clone(),
                InitiationLimits::default(),
            ),
            charge: ChargeWorker::new(
                repo.clone(),
                mobile_money.clone(),
                publisher.clone(),
                retry.clone(),
            ),
            confirm: ConfirmWorker::new(repo.clone(), publisher.clone()),
            credit: CreditWorker::new(
                repo.clone(),
                gateway.clone(),
                accounts.clone(),
                publisher.clone(),
                retry.clone(),
            ),
            debit: DebitWorker::new(
                repo.clone(),
                gateway.clone(),
                accounts.clone(),
                secrets.clone(),
                publisher.clone(),
                retry.clone(),
            ),
            payout: PayoutWorker::new(
                repo.clone(),
                mobile_money.clone(),
                publisher.clone(),
                retry,
                max_payout_retries,
            ),
            repo,
            publisher,
            mobile_money,
            gateway,
            secrets,
        }
    }

    fn rate() -> LockedRate {
        let now = Utc::now();
        LockedRate::new(Decimal::from(150), now, now + chrono::Duration::minutes(5)).unwrap()
    }

    async fn start_deposit(&self, token: &str) -> Transaction {
        self.initiator
            .initiate_deposit(DepositCommand {
                user_id: USER_ID,
                amount_kes_cents: 150_000,
                phone: PHONE.to_string(),
                idempotency_token: token.to_string(),
                rate: Self::rate(),
            })
            .await
            .unwrap()
    }

    async fn start_withdrawal(&self, token: &str, verification_key: &str) -> Transaction {
        self.initiator
            .initiate_withdrawal(WithdrawalCommand {
                user_id: USER_ID,
                amount_usd_cents: 1000,
                phone: PHONE.to_string(),
                idempotency_token: token.to_string(),
                verification_key: verification_key.to_string(),
                rate: Self::rate(),
            })
            .await
            .unwrap()
    }

    fn initiated_msg(id: TransactionId) -> DepositInitiatedMessage {
        DepositInitiatedMessage {
            transaction_id: id.to_string(),
            phone: PHONE.to_string(),
        }
    }

    fn confirmation_msg(id: TransactionId) -> ConfirmationMessage {
        ConfirmationMessage {
            transaction_id: id.to_string(),
            result_code: result_codes::SUCCESS,
            result_desc: "The service request is processed successfully.".to_string(),
            merchant_request_id: "mock-merchant".to_string(),
            checkout_request_id: "mock-checkout".to_string(),
            receipt: Some("SBK1234XYZ".to_string()),
            phone: Some(PHONE.to_string()),
            amount_kes_cents: Some(150_000),
        }
    }

    fn confirmed_msg(id: TransactionId) -> DepositConfirmedMessage {
        DepositConfirmedMessage {
            transaction_id: id.to_string(),
            receipt: "SBK1234XYZ".to_string(),
        }
    }

    fn withdrawal_msg(id: TransactionId, key: &str) -> WithdrawalInitiatedMessage {
        WithdrawalInitiatedMessage {
            transaction_id: id.to_string(),
            phone: PHONE.to_string(),
            verification_key: key.to_string(),
        }
    }

    fn debited_msg(id: TransactionId) -> LedgerDebitedMessage {
        LedgerDebitedMessage {
            transaction_id: id.to_string(),
            phone: PHONE.to_string(),
            provider_transfer_id: format!("tr-{id}"),
        }
    }

    async fn status(&self, id: TransactionId) -> TxStatus {
        self.repo.get(id).await.unwrap().unwrap().status()
    }
}

// === Deposit flow ===

#[tokio::test]
async fn test_deposit_completes_with_both_amounts_recorded() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-1").await;
    let id = tx.id();

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();
    assert_eq!(h.status(id).await, TxStatus::AwaitingMobileMoneyConfirm);

    h.confirm.handle(Harness::confirmation_msg(id)).await.unwrap();
    assert_eq!(h.status(id).await, TxStatus::AwaitingLedgerConfirm);

    h.credit.handle(Harness::confirmed_msg(id)).await.unwrap();

    // 1500.00 KES at the locked 150.00 rate became 10.00 USD on the ledger.
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Completed);
    assert_eq!(stored.principal().cents(), 150_000);
    assert_eq!(stored.ledger_transfer().unwrap().amount_usd_cents, 1000);
    assert_eq!(stored.charge().unwrap().receipt, "SBK1234XYZ");

    let published: Vec<String> = h
        .publisher
        .published()
        .await
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    assert_eq!(
        published,
        vec![
            topics::DEPOSIT_INITIATED,
            topics::DEPOSIT_CHARGE_REQUESTED,
            topics::DEPOSIT_CONFIRMED,
            topics::DEPOSIT_COMPLETED,
        ]
    );

    let completed = h.publisher.on_topic(topics::DEPOSIT_COMPLETED).await;
    assert_eq!(completed[0]["amount_kes_cents"], 150_000);
    assert_eq!(completed[0]["amount_usd_cents"], 1000);
}

#[tokio::test]
async fn test_duplicate_initiation_returns_same_transaction() {
    let h = Harness::new().await;
    let first = h.start_deposit("dep-dup").await;
    let second = h.start_deposit("dep-dup").await;

    assert_eq!(first.id(), second.id());
    assert_eq!(h.repo.len().await, 1);
    assert_eq!(
        h.publisher.on_topic(topics::DEPOSIT_INITIATED).await.len(),
        1
    );
}

#[tokio::test]
async fn test_replayed_confirmation_is_a_noop() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-replay").await;
    let id = tx.id();

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();
    h.confirm.handle(Harness::confirmation_msg(id)).await.unwrap();
    let before = h.repo.get(id).await.unwrap().unwrap();
    let published_before = h.publisher.published().await.len();

    // Redelivery: no new evidence, no status change, no published message.
    h.confirm.handle(Harness::confirmation_msg(id)).await.unwrap();
    let after = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(after.status(), before.status());
    assert_eq!(after.charge(), before.charge());
    assert_eq!(h.publisher.published().await.len(), published_before);
}

#[tokio::test]
async fn test_replayed_charge_message_after_completion_is_a_noop() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-replay-2").await;
    let id = tx.id();

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();
    assert_eq!(h.mobile_money.charge_calls(), 1);

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();
    // No second provider call, state unchanged.
    assert_eq!(h.mobile_money.charge_calls(), 1);
    assert_eq!(h.status(id).await, TxStatus::AwaitingMobileMoneyConfirm);
}

#[tokio::test]
async fn test_user_cancel_fails_deposit() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-cancel").await;
    let id = tx.id();

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();

    let mut msg = Harness::confirmation_msg(id);
    msg.result_code = result_codes::USER_CANCELLED;
    msg.result_desc = "Request cancelled by user".to_string();
    msg.receipt = None;
    h.confirm.handle(msg).await.unwrap();

    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Failed);
    assert_eq!(stored.fail_reason(), Some(reasons::MOBILE_MONEY_CHARGE_DECLINED));
    assert_eq!(stored.provider_error(), Some("Request cancelled by user"));

    let failed = h.publisher.on_topic(topics::DEPOSIT_FAILED).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["reason"], reasons::MOBILE_MONEY_CHARGE_DECLINED);
}

#[tokio::test]
async fn test_confirmation_before_charge_is_a_state_conflict() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-early").await;

    // The charge worker has not run; the transaction is still PENDING.
    let result = h.confirm.handle(Harness::confirmation_msg(tx.id())).await;
    assert!(matches!(result, Err(SagaError::State(_))));
    assert_eq!(h.status(tx.id()).await, TxStatus::Pending);
}

// === Retry behavior ===

#[tokio::test]
async fn test_two_failures_then_success_reaches_next_state() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-retry").await;
    let id = tx.id();

    h.mobile_money
        .push_charge_outcome(Err(MobileMoneyError::Timeout));
    h.mobile_money
        .push_charge_outcome(Err(MobileMoneyError::Unavailable("HTTP 503".into())));
    // Third attempt falls through to the default success.

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();

    assert_eq!(h.mobile_money.charge_calls(), 3);
    assert_eq!(h.status(id).await, TxStatus::AwaitingMobileMoneyConfirm);
    assert!(h.publisher.on_topic(topics::DEPOSIT_FAILED).await.is_empty());
}

#[tokio::test]
async fn test_three_failures_fail_after_the_third_not_before() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-exhaust").await;
    let id = tx.id();

    for _ in 0..3 {
        h.mobile_money
            .push_charge_outcome(Err(MobileMoneyError::Unavailable("HTTP 503".into())));
    }

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();

    assert_eq!(h.mobile_money.charge_calls(), 3);
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Failed);
    assert_eq!(stored.fail_reason(), Some(reasons::MOBILE_MONEY_CHARGE_FAILED));
    assert_eq!(stored.provider_error(), Some("provider unavailable: HTTP 503"));
    assert_eq!(h.publisher.on_topic(topics::DEPOSIT_FAILED).await.len(), 1);
}

#[tokio::test]
async fn test_permanent_rejection_fails_without_retry() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-reject").await;
    let id = tx.id();

    h.mobile_money
        .push_charge_outcome(Err(MobileMoneyError::Rejected("invalid msisdn".into())));

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();

    assert_eq!(h.mobile_money.charge_calls(), 1);
    assert_eq!(h.status(id).await, TxStatus::Failed);
}

#[tokio::test]
async fn test_ledger_credit_rejection_records_stable_message() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-nsf").await;
    let id = tx.id();

    h.charge.handle(Harness::initiated_msg(id)).await.unwrap();
    h.confirm.handle(Harness::confirmation_msg(id)).await.unwrap();

    h.gateway.push_credit_outcome(Err(GatewayError::Rejected {
        code: "INSUFFICIENT_BALANCE".into(),
        message: "insufficient ledger balance".into(),
    }));

    h.credit.handle(Harness::confirmed_msg(id)).await.unwrap();

    assert_eq!(h.gateway.credit_calls(), 1);
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Failed);
    assert_eq!(stored.fail_reason(), Some(reasons::LEDGER_CREDIT_FAILED));
    assert!(stored.provider_error().unwrap().contains("insufficient ledger balance"));
}

// === Withdrawal flow ===

#[tokio::test]
async fn test_withdrawal_completes_with_converted_payout() {
    let h = Harness::new().await;
    h.secrets
        .store("otp:wd-1", "482913", Duration::from_secs(300))
        .await
        .unwrap();

    let tx = h.start_withdrawal("wd-1", "otp:wd-1").await;
    let id = tx.id();

    h.debit
        .handle(Harness::withdrawal_msg(id, "otp:wd-1"))
        .await
        .unwrap();
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::AwaitingMobileMoneyPayout);
    assert_eq!(stored.ledger_transfer().unwrap().amount_usd_cents, 1000);

    h.payout.handle(Harness::debited_msg(id)).await.unwrap();

    // 10.00 USD at the locked 150.00 rate paid out as 1500.00 KES.
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Completed);
    assert_eq!(stored.disbursement().unwrap().amount_kes_cents, 150_000);

    let published: Vec<String> = h
        .publisher
        .published()
        .await
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    assert_eq!(
        published,
        vec![
            topics::WITHDRAWAL_INITIATED,
            topics::WITHDRAWAL_LEDGER_DEBITED,
            topics::WITHDRAWAL_COMPLETED,
        ]
    );
}

#[tokio::test]
async fn test_verification_code_is_single_use_across_invocations() {
    let h = Harness::new().await;
    h.secrets
        .store("otp:shared", "482913", Duration::from_secs(300))
        .await
        .unwrap();

    // First withdrawal consumes the code.
    let first = h.start_withdrawal("wd-a", "otp:shared").await;
    h.debit
        .handle(Harness::withdrawal_msg(first.id(), "otp:shared"))
        .await
        .unwrap();
    assert_eq!(
        h.status(first.id()).await,
        TxStatus::AwaitingMobileMoneyPayout
    );

    // A second worker invocation re-fetching the same key gets "not found"
    // and fails its transaction.
    let second = h.start_withdrawal("wd-b", "otp:shared").await;
    h.debit
        .handle(Harness::withdrawal_msg(second.id(), "otp:shared"))
        .await
        .unwrap();

    let stored = h.repo.get(second.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Failed);
    assert_eq!(
        stored.fail_reason(),
        Some(reasons::VERIFICATION_CODE_MISSING_OR_EXPIRED)
    );
}

#[tokio::test]
async fn test_replayed_debit_message_skips_secret_fetch() {
    let h = Harness::new().await;
    h.secrets
        .store("otp:wd-2", "111111", Duration::from_secs(300))
        .await
        .unwrap();

    let tx = h.start_withdrawal("wd-2", "otp:wd-2").await;
    h.debit
        .handle(Harness::withdrawal_msg(tx.id(), "otp:wd-2"))
        .await
        .unwrap();
    assert_eq!(h.gateway.debit_calls(), 1);

    // Redelivery: evidence guard short-circuits before the secret store,
    // so the burnt code does not fail the transaction.
    h.debit
        .handle(Harness::withdrawal_msg(tx.id(), "otp:wd-2"))
        .await
        .unwrap();
    assert_eq!(h.gateway.debit_calls(), 1);
    assert_eq!(h.status(tx.id()).await, TxStatus::AwaitingMobileMoneyPayout);
}

#[tokio::test]
async fn test_payout_failure_leaves_transaction_retryable_until_max() {
    let h = Harness::with_payout_retries(2).await;
    h.secrets
        .store("otp:wd-3", "222222", Duration::from_secs(300))
        .await
        .unwrap();

    let tx = h.start_withdrawal("wd-3", "otp:wd-3").await;
    let id = tx.id();
    h.debit
        .handle(Harness::withdrawal_msg(id, "otp:wd-3"))
        .await
        .unwrap();

    // First delivery: every attempt fails, counter bumps, still retryable.
    for _ in 0..3 {
        h.mobile_money
            .push_payout_outcome(Err(MobileMoneyError::Timeout));
    }
    h.payout.handle(Harness::debited_msg(id)).await.unwrap();
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::AwaitingMobileMoneyPayout);
    assert_eq!(stored.retry_count(), 1);
    assert!(h.publisher.on_topic(topics::WITHDRAWAL_FAILED).await.is_empty());

    // Second delivery: counter reaches the maximum, terminal failure.
    for _ in 0..3 {
        h.mobile_money
            .push_payout_outcome(Err(MobileMoneyError::Timeout));
    }
    h.payout.handle(Harness::debited_msg(id)).await.unwrap();
    let stored = h.repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TxStatus::Failed);
    assert_eq!(stored.fail_reason(), Some(reasons::PAYOUT_RETRIES_EXHAUSTED));
    assert_eq!(h.publisher.on_topic(topics::WITHDRAWAL_FAILED).await.len(), 1);
}

// === Dispatch ===

#[tokio::test]
async fn test_dispatcher_routes_by_topic() {
    let h = Harness::new().await;
    let tx = h.start_deposit("dep-dispatch").await;

    let dispatcher = StepDispatcher::new(h.charge, h.confirm, h.credit, h.debit, h.payout);
    dispatcher
        .dispatch(
            topics::DEPOSIT_INITIATED,
            &serde_json::json!({
                "transaction_id": tx.id().to_string(),
                "phone": PHONE,
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        h.repo.get(tx.id()).await.unwrap().unwrap().status(),
        TxStatus::AwaitingMobileMoneyConfirm
    );

    let result = dispatcher
        .dispatch("no-such-topic", &serde_json::json!({}))
        .await;
    assert!(matches!(result, Err(SagaError::MalformedMessage(_))));
}

#[tokio::test]
async fn test_malformed_transaction_id_fails_fast() {
    let h = Harness::new().await;
    let result = h
        .charge
        .handle(DepositInitiatedMessage {
            transaction_id: "not-a-ulid".to_string(),
            phone: PHONE.to_string(),
        })
        .await;
    assert!(matches!(result, Err(SagaError::MalformedMessage(_))));
    assert_eq!(h.mobile_money.charge_calls(), 0);
}
