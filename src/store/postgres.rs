//! PostgreSQL transaction repository.
//!
//! Saves use an optimistic version column: `UPDATE ... WHERE version = $n`.
//! A zero-row update means another worker persisted first; the caller
//! re-reads and re-checks its guards. Rehydration goes through
//! [`Transaction::reconstitute`] only - the mapping layer never reaches past
//! the aggregate's constructor.
//!
//! Reference schema:
//!
//! ```sql
//! CREATE TABLE transactions_tb (
//!     transaction_id     TEXT PRIMARY KEY,
//!     user_id            BIGINT      NOT NULL,
//!     direction          SMALLINT    NOT NULL,
//!     principal_cents    BIGINT      NOT NULL,
//!     principal_currency TEXT        NOT NULL,
//!     rate               NUMERIC     NOT NULL,
//!     rate_locked_at     TIMESTAMPTZ NOT NULL,
//!     rate_expires_at    TIMESTAMPTZ NOT NULL,
//!     idem_key           TEXT        NOT NULL UNIQUE,
//!     idem_expires_at    TIMESTAMPTZ NOT NULL,
//!     status             SMALLINT    NOT NULL,
//!     charge             JSONB,
//!     ledger_transfer    JSONB,
//!     disbursement       JSONB,
//!     fail_reason        TEXT,
//!     provider_error     TEXT,
//!     retry_count        INT         NOT NULL DEFAULT 0,
//!     version            BIGINT      NOT NULL,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     updated_at         TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{StoreError, TransactionRepository};
use crate::money::{Currency, LockedRate, Money};
use crate::transaction::{
    ChargeEvidence, Direction, DisbursementEvidence, IdempotencyKey, LedgerTransferEvidence,
    Transaction, TransactionId, TxStatus,
};

const SELECT_COLUMNS: &str = "transaction_id, user_id, direction, principal_cents, \
     principal_currency, rate, rate_locked_at, rate_expires_at, idem_key, idem_expires_at, \
     status, charge, ledger_transfer, disbursement, fail_reason, provider_error, \
     retry_count, version, created_at, updated_at";

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, StoreError> {
        let id_str: String = row.get("transaction_id");
        let id: TransactionId = id_str
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("invalid transaction_id: {id_str}")))?;

        let direction_id: i16 = row.get("direction");
        let direction = Direction::from_id(direction_id)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid direction: {direction_id}")))?;

        let status_id: i16 = row.get("status");
        let status = TxStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid status: {status_id}")))?;

        let currency_code: String = row.get("principal_currency");
        let currency = Currency::from_code(&currency_code)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid currency: {currency_code}")))?;
        let principal = Money::from_cents(row.get::<i64, _>("principal_cents"), currency)
            .map_err(|e| StoreError::Corrupt(format!("invalid principal: {e}")))?;

        let rate_value: Decimal = row.get("rate");
        let rate = LockedRate::new(
            rate_value,
            row.get::<DateTime<Utc>, _>("rate_locked_at"),
            row.get::<DateTime<Utc>, _>("rate_expires_at"),
        )
        .map_err(|e| StoreError::Corrupt(format!("invalid rate: {e}")))?;

        let idempotency_key = IdempotencyKey::from_parts(
            row.get::<String, _>("idem_key"),
            row.get::<DateTime<Utc>, _>("idem_expires_at"),
        );

        let charge: Option<ChargeEvidence> = Self::evidence(row, "charge")?;
        let ledger_transfer: Option<LedgerTransferEvidence> = Self::evidence(row, "ledger_transfer")?;
        let disbursement: Option<DisbursementEvidence> = Self::evidence(row, "disbursement")?;

        Ok(Transaction::reconstitute(
            id,
            row.get::<i64, _>("user_id") as u64,
            direction,
            principal,
            rate,
            idempotency_key,
            status,
            charge,
            ledger_transfer,
            disbursement,
            row.get("fail_reason"),
            row.get("provider_error"),
            row.get::<i32, _>("retry_count") as u32,
            row.get("version"),
            row.get("created_at"),
            row.get("updated_at"),
        ))
    }

    fn evidence<T: serde::de::DeserializeOwned>(
        row: &PgRow,
        column: &str,
    ) -> Result<Option<T>, StoreError> {
        let value: Option<serde_json::Value> = row.get(column);
        match value {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("invalid {column} evidence: {e}"))),
            None => Ok(None),
        }
    }

    fn evidence_json<T: serde::Serialize>(value: Option<&T>) -> Option<serde_json::Value> {
        value.map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions_tb WHERE transaction_id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, tx: &mut Transaction) -> Result<(), StoreError> {
        let expected = tx.version();

        let rows_affected = if expected == 0 {
            sqlx::query(
                r#"
                INSERT INTO transactions_tb
                    (transaction_id, user_id, direction, principal_cents, principal_currency,
                     rate, rate_locked_at, rate_expires_at, idem_key, idem_expires_at,
                     status, charge, ledger_transfer, disbursement, fail_reason, provider_error,
                     retry_count, version, created_at, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                     $11, $12, $13, $14, $15, $16, $17, 1, $18, $19)
                ON CONFLICT (transaction_id) DO NOTHING
                "#,
            )
            .bind(tx.id().to_string())
            .bind(tx.user_id() as i64)
            .bind(tx.direction().id())
            .bind(tx.principal().cents())
            .bind(tx.principal().currency().as_str())
            .bind(tx.rate().rate())
            .bind(tx.rate().locked_at())
            .bind(tx.rate().expires_at())
            .bind(tx.idempotency_key().token())
            .bind(tx.idempotency_key().expires_at())
            .bind(tx.status().id())
            .bind(Self::evidence_json(tx.charge()))
            .bind(Self::evidence_json(tx.ledger_transfer()))
            .bind(Self::evidence_json(tx.disbursement()))
            .bind(tx.fail_reason())
            .bind(tx.provider_error())
            .bind(tx.retry_count() as i32)
            .bind(tx.created_at())
            .bind(tx.updated_at())
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE transactions_tb
                SET status = $1, charge = $2, ledger_transfer = $3, disbursement = $4,
                    fail_reason = $5, provider_error = $6, retry_count = $7,
                    version = version + 1, updated_at = $8
                WHERE transaction_id = $9 AND version = $10
                "#,
            )
            .bind(tx.status().id())
            .bind(Self::evidence_json(tx.charge()))
            .bind(Self::evidence_json(tx.ledger_transfer()))
            .bind(Self::evidence_json(tx.disbursement()))
            .bind(tx.fail_reason())
            .bind(tx.provider_error())
            .bind(tx.retry_count() as i32)
            .bind(tx.updated_at())
            .bind(tx.id().to_string())
            .bind(expected)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            return Err(StoreError::VersionConflict {
                id: tx.id(),
                expected,
            });
        }

        tx.set_version(expected + 1);
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        token: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions_tb WHERE idem_key = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }
}
