//! One-time secret store.
//!
//! Holds withdrawal verification codes keyed by an opaque token. The read
//! is destructive: `get_and_delete` hands the value out at most once, so a
//! replayed ledger-debit step cannot reuse a code.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::StoreError;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store a secret with a time-to-live. Overwrites an existing key.
    async fn store(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically fetch and remove the secret.
    ///
    /// A second call for the same key returns `None`, as does a call after
    /// the TTL elapsed.
    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// In-memory secret store for tests and single-process wiring.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Database(format!("invalid ttl: {e}")))?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, StoreError> {
        let removed = self.entries.lock().await.remove(key);
        Ok(removed.and_then(|(value, expires_at)| {
            if Utc::now() < expires_at {
                Some(value)
            } else {
                None
            }
        }))
    }
}

/// PostgreSQL secret store.
///
/// `DELETE ... RETURNING` makes the consume a single atomic statement -
/// two concurrent fetches cannot both observe the value.
///
/// ```sql
/// CREATE TABLE saga_secrets_tb (
///     key        TEXT PRIMARY KEY,
///     value      TEXT        NOT NULL,
///     expires_at TIMESTAMPTZ NOT NULL
/// );
/// ```
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn store(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Database(format!("invalid ttl: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO saga_secrets_tb (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value,
                                            expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar(
            "DELETE FROM saga_secrets_tb WHERE key = $1 AND expires_at > NOW() RETURNING value",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }
}
