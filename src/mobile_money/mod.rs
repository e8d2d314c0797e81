//! Mobile-money client contract.
//!
//! The HTTP client itself lives outside this engine; the workers consume
//! only this narrow contract. Request construction, signing and callback
//! routing belong to the collaborator that implements it.

pub mod http;

pub use http::{HttpMobileMoneyClient, HttpMobileMoneyConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

/// Result codes the provider reports on charge confirmations.
/// 0 is success; 1032 is a user cancel; 1037 is an unreachable handset.
pub mod result_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_CANCELLED: i32 = 1032;
    pub const TIMEOUT: i32 = 1037;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MobileMoneyError {
    /// Explicit provider rejection. Permanent - do not retry.
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Transport-level failure or 5xx. Retryable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// No response in time. Outcome unknown. Retryable.
    #[error("provider request timed out")]
    Timeout,
}

impl MobileMoneyError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, MobileMoneyError::Rejected(_))
    }
}

/// Push-charge request (customer pays in).
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub phone: String,
    /// KES amount to charge.
    pub amount: Money,
    /// Our reference, the transaction id.
    pub reference: String,
}

/// Correlation ids for an accepted push charge. The receipt arrives later,
/// on the provider's confirmation callback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChargeHandle {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

/// Payout request (customer paid out).
#[derive(Debug, Clone, Serialize)]
pub struct PayoutRequest {
    pub phone: String,
    /// KES amount to disburse.
    pub amount: Money,
    pub reference: String,
}

/// Settled payout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PayoutReceipt {
    pub conversation_id: String,
    pub originator_conversation_id: String,
    pub receipt: String,
    pub result_code: i32,
}

#[async_trait]
pub trait MobileMoneyClient: Send + Sync {
    /// Initiate a push charge against the customer's handset.
    async fn initiate_charge(&self, req: &ChargeRequest)
    -> Result<ChargeHandle, MobileMoneyError>;

    /// Disburse funds to the customer.
    async fn payout(&self, req: &PayoutRequest) -> Result<PayoutReceipt, MobileMoneyError>;
}


#[cfg(test)]
pub use mock::MockMobileMoneyClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_permanence() {
        assert!(MobileMoneyError::Rejected("bad msisdn".into()).is_permanent());
        assert!(!MobileMoneyError::Unavailable("503".into()).is_permanent());
        assert!(!MobileMoneyError::Timeout.is_permanent());
    }

    #[tokio::test]
    async fn test_mock_scripting() {
        let mock = MockMobileMoneyClient::new();
        mock.push_charge_outcome(Err(MobileMoneyError::Timeout));

        let req = ChargeRequest {
            phone: "254700000001".into(),
            amount: Money::kes(150_000).unwrap(),
            reference: "tx-1".into(),
        };
        assert_eq!(
            mock.initiate_charge(&req).await,
            Err(MobileMoneyError::Timeout)
        );
        // Unscripted calls succeed with defaults.
        assert!(mock.initiate_charge(&req).await.is_ok());
        assert_eq!(mock.charge_calls(), 2);
    }
}
