//! Daily valuation snapshot pass.
//!
//! Reads every stock row of a tenant, freezes catalog descriptors and derived
//! figures into lines, and persists one snapshot per store as a single batch.
//! Passes for one tenant are serialized; different tenants run independently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use stockledger_core::{Clock, DomainError, ProductId, StoreId, TenantId};
use stockledger_inventory::{StockLevel, ValuationSnapshot, ValuationSnapshotLine};

use super::store::{SnapshotBatch, SnapshotStore, SnapshotStoreError, StoreSnapshot};
use crate::catalog::{CatalogError, ProductCatalog};
use crate::store::{LedgerStore, LedgerStoreError};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read stock levels: {0}")]
    Ledger(#[from] LedgerStoreError),

    #[error("failed to read product catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to persist snapshot batch: {0}")]
    Store(#[from] SnapshotStoreError),

    #[error("failed to value stock level: {0}")]
    Valuation(#[from] DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotRun {
    Created {
        as_of: NaiveDate,
        snapshots: usize,
        lines: usize,
    },
    /// A batch for this day already exists; nothing was written.
    AlreadyTaken { as_of: NaiveDate },
}

impl SnapshotRun {
    pub fn as_of(&self) -> NaiveDate {
        match self {
            SnapshotRun::Created { as_of, .. } | SnapshotRun::AlreadyTaken { as_of } => *as_of,
        }
    }
}

pub struct SnapshotBuilder<L, S, C> {
    ledger: L,
    snapshots: S,
    catalog: C,
    clock: Arc<dyn Clock>,
    tenant_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl<L, S, C> SnapshotBuilder<L, S, C>
where
    L: LedgerStore,
    S: SnapshotStore,
    C: ProductCatalog,
{
    pub fn new(ledger: L, snapshots: S, catalog: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            snapshots,
            catalog,
            clock,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn tenant_lock(&self, tenant_id: TenantId) -> Arc<Mutex<()>> {
        let mut locks = self.tenant_locks.lock().await;
        locks.entry(tenant_id).or_default().clone()
    }

    /// Tenants with at least one stock row.
    pub async fn tenants(&self) -> Result<Vec<TenantId>, SnapshotError> {
        Ok(self.ledger.list_tenants().await?)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshot every stock row of the tenant as of now.
    ///
    /// At most one batch per tenant per UTC day; later runs on the same day
    /// return [`SnapshotRun::AlreadyTaken`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    pub async fn run(&self, tenant_id: TenantId) -> Result<SnapshotRun, SnapshotError> {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let as_of = now.date_naive();

        if self.snapshots.has_batch(tenant_id, as_of).await? {
            info!(%as_of, "snapshot already taken for today");
            return Ok(SnapshotRun::AlreadyTaken { as_of });
        }

        let levels = self.ledger.list_stock_levels(tenant_id, None).await?;
        let product_ids: Vec<ProductId> = levels
            .iter()
            .map(|l| l.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let descriptors = self.catalog.describe(tenant_id, &product_ids).await?;

        let mut by_store: BTreeMap<StoreId, Vec<StockLevel>> = BTreeMap::new();
        for level in levels {
            by_store.entry(level.store_id).or_default().push(level);
        }

        let mut snapshots = Vec::with_capacity(by_store.len());
        for (store_id, levels) in by_store {
            let snapshot = ValuationSnapshot::new(tenant_id, store_id, now);
            let lines = levels
                .iter()
                .map(|level| {
                    let descriptor = descriptors.get(&level.product_id).cloned().unwrap_or_default();
                    ValuationSnapshotLine::freeze(&snapshot, level, descriptor)
                })
                .collect::<Result<Vec<_>, _>>()?;
            snapshots.push(StoreSnapshot { snapshot, lines });
        }

        let batch = SnapshotBatch {
            tenant_id,
            as_of,
            snapshots,
        };
        let snapshot_count = batch.snapshots.len();
        let line_count = batch.line_count();

        match self.snapshots.persist_batch(batch).await {
            Ok(()) => {}
            Err(SnapshotStoreError::AlreadyExists(_)) => {
                info!(%as_of, "snapshot batch persisted concurrently elsewhere");
                return Ok(SnapshotRun::AlreadyTaken { as_of });
            }
            Err(e) => return Err(e.into()),
        }

        info!(%as_of, snapshots = snapshot_count, lines = line_count, "valuation snapshot created");
        Ok(SnapshotRun::Created {
            as_of,
            snapshots: snapshot_count,
            lines: line_count,
        })
    }
}
