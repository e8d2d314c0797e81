//! Trading-ledger connectivity.
//!
//! One persistent connection multiplexes every concurrent request/response
//! pair by correlation id ([`client`]), with keepalive and bounded-backoff
//! reconnect. The step gateways ([`gateway`]) translate domain calls into
//! single RPC calls and map responses back into domain results.

pub mod client;
pub mod error;
pub mod gateway;
pub mod protocol;

pub use client::{LedgerClientConfig, LedgerRpcClient, reconnect_delay};
pub use error::GatewayError;
pub use gateway::{LedgerGateway, RpcLedgerGateway, TransferInstruction, TransferOutcome};
