use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{ExpectedVersion, StoreId, TenantId};
use stockledger_inventory::{HistoryEntry, IdempotencyKey, StockKey, StockLevel, StockSettings};

use crate::history::query::{HistoryFilter, HistoryPage, Pagination};

/// A planned stock change ready to be committed.
///
/// The entry carries the target row (store, product), the signed adjustment and
/// the resulting units computed against the version in `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCommit {
    pub expected_version: ExpectedVersion,
    pub entry: HistoryEntry,
}

/// Result of a commit attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The row moved and the entry was appended (with its sequence assigned).
    Applied {
        entry: HistoryEntry,
        level: StockLevel,
    },
    /// The idempotency key was already recorded; nothing changed.
    Duplicate(HistoryEntry),
}

/// Ledger persistence error.
///
/// These are infrastructure errors (storage, concurrency, isolation) as opposed
/// to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// No stock row for the (store, product) pair.
    #[error("stock level not found")]
    NotFound,

    #[error("product is already linked to the store")]
    AlreadyLinked,

    /// Row version moved since it was read.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Tenant-scoped stock levels + append-only history ledger.
///
/// Implementations must:
/// - enforce tenant isolation on every read and write
/// - make `commit_change` atomic: row update and entry insert both happen or
///   neither does
/// - treat the entry's idempotency key as unique per tenant, checked inside the
///   same transaction as the row update
/// - assign strictly increasing `sequence` numbers to appended entries
/// - never update or delete history entries
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the stock row for a newly linked (store, product) pair.
    async fn link_product(&self, level: StockLevel) -> Result<StockLevel, LedgerStoreError>;

    /// Change pricing/replenishment attributes without touching units.
    async fn update_settings(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
    ) -> Result<StockLevel, LedgerStoreError>;

    /// Remove the row when the product is unlinked from the store.
    async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerStoreError>;

    async fn load_stock_level(
        &self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> Result<Option<StockLevel>, LedgerStoreError>;

    /// All rows of a tenant, optionally restricted to some stores.
    async fn list_stock_levels(
        &self,
        tenant_id: TenantId,
        stores: Option<&[StoreId]>,
    ) -> Result<Vec<StockLevel>, LedgerStoreError>;

    /// Tenants that track at least one stock row.
    async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerStoreError>;

    async fn find_entry(
        &self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<HistoryEntry>, LedgerStoreError>;

    async fn commit_change(&self, commit: StockCommit) -> Result<CommitOutcome, LedgerStoreError>;

    async fn query_history(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<HistoryPage, LedgerStoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn link_product(&self, level: StockLevel) -> Result<StockLevel, LedgerStoreError> {
        (**self).link_product(level).await
    }

    async fn update_settings(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
    ) -> Result<StockLevel, LedgerStoreError> {
        (**self).update_settings(tenant_id, key, settings).await
    }

    async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerStoreError> {
        (**self).unlink_product(tenant_id, key).await
    }

    async fn load_stock_level(
        &self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> Result<Option<StockLevel>, LedgerStoreError> {
        (**self).load_stock_level(tenant_id, key).await
    }

    async fn list_stock_levels(
        &self,
        tenant_id: TenantId,
        stores: Option<&[StoreId]>,
    ) -> Result<Vec<StockLevel>, LedgerStoreError> {
        (**self).list_stock_levels(tenant_id, stores).await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerStoreError> {
        (**self).list_tenants().await
    }

    async fn find_entry(
        &self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<HistoryEntry>, LedgerStoreError> {
        (**self).find_entry(tenant_id, key).await
    }

    async fn commit_change(&self, commit: StockCommit) -> Result<CommitOutcome, LedgerStoreError> {
        (**self).commit_change(commit).await
    }

    async fn query_history(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<HistoryPage, LedgerStoreError> {
        (**self).query_history(tenant_id, filter, pagination).await
    }
}
