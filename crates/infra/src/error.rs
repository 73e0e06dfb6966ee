use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::LedgerStoreError;

/// Errors surfaced by the ledger writer and the history services.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No stock row for the (store, product) pair in this tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic retries exhausted.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("product is already linked to the store")]
    AlreadyLinked,

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
        }
    }
}

impl From<LedgerStoreError> for LedgerError {
    fn from(err: LedgerStoreError) -> Self {
        match err {
            LedgerStoreError::NotFound => LedgerError::NotFound("stock level".to_string()),
            LedgerStoreError::AlreadyLinked => LedgerError::AlreadyLinked,
            LedgerStoreError::Concurrency(msg) => LedgerError::Conflict(msg),
            LedgerStoreError::TenantIsolation(msg) => LedgerError::TenantIsolation(msg),
            LedgerStoreError::Storage(msg) => LedgerError::Store(msg),
        }
    }
}
