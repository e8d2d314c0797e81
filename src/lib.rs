//! pesa-bridge - mobile-money to trading-ledger transfer engine.
//!
//! Moves user funds between a mobile-money rail (KES) and an online trading
//! ledger (USD) as deposits and withdrawals. Each transfer crosses two
//! independent, unreliable external systems; the engine guarantees the
//! business effect happens at most once and is never lost mid-flight.
//!
//! # Modules
//!
//! - [`money`] - exact integer-cent amounts and the locked exchange rate
//! - [`transaction`] - the transaction FSM, evidence records, domain events
//! - [`store`] - repository, account-directory and one-time-secret contracts
//! - [`publisher`] - outbound step-message publishing
//! - [`ledger`] - the multiplexed RPC client and the credit/debit gateways
//! - [`mobile_money`] - the mobile-money client contract
//! - [`saga`] - initiation commands and the per-step workers
//! - [`config`] / [`logging`] - YAML configuration and tracing setup

pub mod config;
pub mod ledger;
pub mod logging;
pub mod mobile_money;
pub mod money;
pub mod publisher;
pub mod saga;
pub mod store;
pub mod transaction;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use ledger::{GatewayError, LedgerClientConfig, LedgerRpcClient};
pub use money::{Currency, LockedRate, Money, MoneyError};
pub use saga::{RetryPolicy, SagaError, SagaInitiator, StepDispatcher};
pub use transaction::{Transaction, TransactionError, TransactionId, TxStatus};
