//! Saga worker error types.

use thiserror::Error;

use crate::money::MoneyError;
use crate::publisher::PublishError;
use crate::store::StoreError;
use crate::transaction::TransactionError;

/// Errors surfaced by the step workers and the initiation commands.
///
/// Persistence errors pass through untouched: a step is not complete until
/// its save succeeded, so the caller (the message consumer) sees the failure
/// and redelivers.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("malformed step message: {0}")]
    MalformedMessage(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    /// Synchronous pre-creation failure: limits, eligibility, bad input.
    /// No side effects have occurred.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    State(#[from] TransactionError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}
