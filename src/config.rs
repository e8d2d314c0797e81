use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerClientConfig;
use crate::mobile_money::HttpMobileMoneyConfig;
use crate::saga::{InitiationLimits, RetryPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Frame-level logging of ledger wire traffic (target "wire").
    pub enable_wire_tracing: bool,
    /// PostgreSQL connection URL for transactions and one-time secrets.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub mobile_money: MobileMoneySettings,
    #[serde(default)]
    pub saga: SagaSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerSettings {
    pub url: String,
    /// Our account on the ledger, the fixed side of every transfer.
    pub account_id: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9443/rpc".to_string(),
            account_id: "bridge-main".to_string(),
            auth_token: None,
            request_timeout_ms: 20_000,
            keepalive_interval_secs: 30,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl LedgerSettings {
    pub fn client_config(&self) -> LedgerClientConfig {
        LedgerClientConfig {
            url: self.url.clone(),
            auth_token: self.auth_token.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            reconnect_cap: Duration::from_millis(self.reconnect_cap_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MobileMoneySettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for MobileMoneySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            api_key: String::new(),
            timeout_ms: 30_000,
        }
    }
}

impl MobileMoneySettings {
    pub fn client_config(&self) -> HttpMobileMoneyConfig {
        HttpMobileMoneyConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SagaSettings {
    /// Gateway attempts per worker invocation.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Payout failures tolerated across invocations before FAILED.
    pub payout_max_retries: u32,
    pub min_deposit_kes_cents: i64,
    pub max_deposit_kes_cents: i64,
    pub min_withdrawal_usd_cents: i64,
    pub max_withdrawal_usd_cents: i64,
}

impl Default for SagaSettings {
    fn default() -> Self {
        let limits = InitiationLimits::default();
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            payout_max_retries: 5,
            min_deposit_kes_cents: limits.min_deposit_kes_cents,
            max_deposit_kes_cents: limits.max_deposit_kes_cents,
            min_withdrawal_usd_cents: limits.min_withdrawal_usd_cents,
            max_withdrawal_usd_cents: limits.max_withdrawal_usd_cents,
        }
    }
}

impl SagaSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn limits(&self) -> InitiationLimits {
        InitiationLimits {
            min_deposit_kes_cents: self.min_deposit_kes_cents,
            max_deposit_kes_cents: self.max_deposit_kes_cents,
            min_withdrawal_usd_cents: self.min_withdrawal_usd_cents,
            max_withdrawal_usd_cents: self.max_withdrawal_usd_cents,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "pesa-bridge.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_wire_tracing: false,
            postgres_url: None,
            ledger: LedgerSettings::default(),
            mobile_money: MobileMoneySettings::default(),
            saga: SagaSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let ledger = LedgerSettings::default();
        let cfg = ledger.client_config();
        assert_eq!(cfg.request_timeout, Duration::from_secs(20));
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(30));
        assert_eq!(cfg.reconnect_base, Duration::from_secs(1));
        assert_eq!(cfg.reconnect_cap, Duration::from_secs(30));
        assert_eq!(cfg.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_retry_defaults() {
        let saga = SagaSettings::default();
        let policy = saga.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
log_level: debug
log_dir: ./logs
log_file: bridge.log
use_json: true
rotation: hourly
enable_wire_tracing: true
ledger:
  url: wss://ledger.example.com/rpc
  account_id: bridge-prod
  request_timeout_ms: 5000
  keepalive_interval_secs: 30
  reconnect_base_ms: 1000
  reconnect_cap_ms: 30000
  max_reconnect_attempts: 10
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.ledger.url, "wss://ledger.example.com/rpc");
        assert_eq!(cfg.ledger.request_timeout_ms, 5000);
        // Omitted sections fall back to defaults.
        assert_eq!(cfg.saga.max_attempts, 3);
        assert!(cfg.postgres_url.is_none());
    }
}
