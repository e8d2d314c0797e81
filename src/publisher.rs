//! Outbound message publishing.
//!
//! At-least-once, fire-and-forget from the engine's perspective: the broker
//! owns delivery and redelivery. One topic per saga transition.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Step-message topics. The `*-initiated` topics trigger the first worker
/// of each saga; the rest announce transitions to downstream consumers and
/// to the next worker in the chain.
pub mod topics {
    pub const DEPOSIT_INITIATED: &str = "deposit-initiated";
    pub const DEPOSIT_CHARGE_REQUESTED: &str = "deposit-charge-requested";
    pub const MOBILE_MONEY_CONFIRMATION: &str = "mobile-money-confirmation";
    pub const DEPOSIT_CONFIRMED: &str = "deposit-confirmed";
    pub const DEPOSIT_COMPLETED: &str = "deposit-completed";
    pub const DEPOSIT_FAILED: &str = "deposit-failed";

    pub const WITHDRAWAL_INITIATED: &str = "withdrawal-initiated";
    pub const WITHDRAWAL_LEDGER_DEBITED: &str = "withdrawal-ledger-debited";
    pub const WITHDRAWAL_COMPLETED: &str = "withdrawal-completed";
    pub const WITHDRAWAL_FAILED: &str = "withdrawal-failed";
}

#[derive(Debug, Error)]
#[error("publish to {topic} failed: {message}")]
pub struct PublishError {
    pub topic: String,
    pub message: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError>;
}

/// Capturing publisher for tests and local wiring.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub async fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.messages.lock().await.clone()
    }

    /// Messages published to one topic.
    pub async fn on_topic(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Drain the captured messages.
    pub async fn take(&self) -> Vec<(String, serde_json::Value)> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        self.messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }
}
