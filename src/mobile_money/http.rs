//! Thin HTTP implementation of the mobile-money contract.
//!
//! Maps provider responses onto the narrow trait the workers consume.
//! Signing, callback verification and the rest of the provider surface live
//! with the collaborator service that owns the provider relationship.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ChargeHandle, ChargeRequest, MobileMoneyClient, MobileMoneyError, PayoutReceipt, PayoutRequest,
};

#[derive(Debug, Clone)]
pub struct HttpMobileMoneyConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct HttpMobileMoneyClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    phone: &'a str,
    amount_cents: i64,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Deserialize)]
struct ChargeAccepted {
    merchant_request_id: String,
    checkout_request_id: String,
}

#[derive(Serialize)]
struct PayoutBody<'a> {
    phone: &'a str,
    amount_cents: i64,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Deserialize)]
struct PayoutSettled {
    conversation_id: String,
    originator_conversation_id: String,
    receipt: String,
    result_code: i32,
}

impl HttpMobileMoneyClient {
    pub fn new(config: HttpMobileMoneyConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        }
    }

    async fn post<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, MobileMoneyError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MobileMoneyError::Timeout
                } else {
                    MobileMoneyError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MobileMoneyError::Rejected(format!("HTTP {status}: {detail}")));
        }
        if !status.is_success() {
            return Err(MobileMoneyError::Unavailable(format!("HTTP {status}")));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| MobileMoneyError::Unavailable(format!("bad provider response: {e}")))
    }
}

#[async_trait]
impl MobileMoneyClient for HttpMobileMoneyClient {
    async fn initiate_charge(
        &self,
        req: &ChargeRequest,
    ) -> Result<ChargeHandle, MobileMoneyError> {
        debug!(reference = %req.reference, "initiating push charge");
        let accepted: ChargeAccepted = self
            .post(
                "/charges",
                &ChargeBody {
                    phone: &req.phone,
                    amount_cents: req.amount.cents(),
                    currency: req.amount.currency().as_str(),
                    reference: &req.reference,
                },
            )
            .await?;
        Ok(ChargeHandle {
            merchant_request_id: accepted.merchant_request_id,
            checkout_request_id: accepted.checkout_request_id,
        })
    }

    async fn payout(&self, req: &PayoutRequest) -> Result<PayoutReceipt, MobileMoneyError> {
        debug!(reference = %req.reference, "initiating payout");
        let settled: PayoutSettled = self
            .post(
                "/payouts",
                &PayoutBody {
                    phone: &req.phone,
                    amount_cents: req.amount.cents(),
                    currency: req.amount.currency().as_str(),
                    reference: &req.reference,
                },
            )
            .await?;
        Ok(PayoutReceipt {
            conversation_id: settled.conversation_id,
            originator_conversation_id: settled.originator_conversation_id,
            receipt: settled.receipt,
            result_code: settled.result_code,
        })
    }
}
