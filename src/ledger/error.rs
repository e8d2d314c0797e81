//! Ledger gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the RPC client and the step gateways.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// The call's timer fired. The remote outcome is UNKNOWN - the ledger
    /// may still have executed the transfer. Callers reconcile via later
    /// state queries rather than assume the effect did not happen.
    #[error("request timed out after {0:?} (remote outcome unknown)")]
    Timeout(Duration),

    #[error("not connected to the ledger system")]
    NotConnected,

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// Application-level rejection from the ledger. Permanent: retrying the
    /// identical call cannot succeed.
    #[error("ledger rejected the request: {message} ({code})")]
    Rejected { code: String, message: String },

    /// A response that violates the contract, e.g. a successful transfer
    /// with no transfer id. Treated as permanent - blind retries could
    /// duplicate the transfer.
    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Permanent errors fail the step immediately; transient ones go through
    /// the bounded retry loop.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GatewayError::Rejected { .. } | GatewayError::MalformedResponse(_)
        )
    }
}
