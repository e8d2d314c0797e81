//! Persistence contracts and implementations.
//!
//! The persisted transaction row is the single source of truth: workers
//! reload it immediately before every guard check instead of trusting an
//! in-memory copy carried across calls. `save` is optimistic - a stale
//! version loses and the caller re-reads.

pub mod postgres;
pub mod secrets;

pub use postgres::PgTransactionRepository;
pub use secrets::{MemorySecretStore, PgSecretStore, SecretStore};

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::transaction::{Transaction, TransactionId};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another worker saved this transaction first. Re-read and re-check.
    #[error("version conflict saving transaction {id} (expected version {expected})")]
    VersionConflict { id: TransactionId, expected: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt persisted row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Transaction repository contract.
///
/// Must be read-your-writes consistent: a `get` issued after a successful
/// `save` observes that save.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Persist the aggregate, bumping its version on success.
    ///
    /// Fails with [`StoreError::VersionConflict`] when the stored version no
    /// longer matches - whichever worker persisted first wins.
    async fn save(&self, tx: &mut Transaction) -> Result<(), StoreError>;

    async fn find_by_idempotency_key(
        &self,
        token: &str,
    ) -> Result<Option<Transaction>, StoreError>;
}

/// Narrow view of the user-profile system: which trading account on the
/// ledger belongs to a user. Profile management itself is external.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn ledger_account_for(&self, user_id: u64) -> Result<Option<String>, StoreError>;
}

/// In-memory account directory for tests and single-process wiring.
#[derive(Default)]
pub struct MemoryAccountDirectory {
    accounts: RwLock<HashMap<u64, String>>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: u64, account_id: impl Into<String>) {
        self.accounts.write().await.insert(user_id, account_id.into());
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    async fn ledger_account_for(&self, user_id: u64) -> Result<Option<String>, StoreError> {
        Ok(self.accounts.read().await.get(&user_id).cloned())
    }
}

/// In-memory repository used by tests and single-process wiring.
#[derive(Default)]
pub struct MemoryTransactionRepository {
    rows: RwLock<HashMap<TransactionId, Transaction>>,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn save(&self, tx: &mut Transaction) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if let Some(stored) = rows.get(&tx.id())
            && stored.version() != tx.version()
        {
            return Err(StoreError::VersionConflict {
                id: tx.id(),
                expected: tx.version(),
            });
        }
        tx.set_version(tx.version() + 1);
        // Events are not persisted - the caller drains and delivers them.
        let mut stored = tx.clone();
        stored.drain_events();
        rows.insert(tx.id(), stored);
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        token: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|tx| tx.idempotency_key().token() == token)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{LockedRate, Money};
    use crate::transaction::IdempotencyKey;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    fn make_deposit(token: &str) -> Transaction {
        let now = Utc::now();
        Transaction::deposit(
            1001,
            Money::kes(150_000).unwrap(),
            LockedRate::new(Decimal::from(150), now, now + Duration::minutes(5)).unwrap(),
            IdempotencyKey::new(token, now, Duration::hours(24)).unwrap(),
            now,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = MemoryTransactionRepository::new();
        let mut tx = make_deposit("key-1");
        let id = tx.id();

        repo.save(&mut tx).await.unwrap();
        assert_eq!(tx.version(), 1);

        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), id);
        assert_eq!(loaded.version(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let repo = MemoryTransactionRepository::new();
        assert!(repo.get(TransactionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_idempotency_key() {
        let repo = MemoryTransactionRepository::new();
        let mut tx = make_deposit("key-xyz");
        repo.save(&mut tx).await.unwrap();

        let found = repo.find_by_idempotency_key("key-xyz").await.unwrap();
        assert_eq!(found.unwrap().id(), tx.id());
        assert!(repo.find_by_idempotency_key("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_save_loses() {
        let repo = MemoryTransactionRepository::new();
        let mut tx = make_deposit("key-1");
        repo.save(&mut tx).await.unwrap();

        // Two workers load the same version.
        let mut copy_a = repo.get(tx.id()).await.unwrap().unwrap();
        let mut copy_b = repo.get(tx.id()).await.unwrap().unwrap();

        repo.save(&mut copy_a).await.unwrap();
        let result = repo.save(&mut copy_b).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
    }
}
