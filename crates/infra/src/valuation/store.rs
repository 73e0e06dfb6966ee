use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{StoreId, TenantId};
use stockledger_inventory::{ValuationSnapshot, ValuationSnapshotLine};

/// One store's snapshot header and its frozen lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub snapshot: ValuationSnapshot,
    pub lines: Vec<ValuationSnapshotLine>,
}

/// Everything one builder pass produced for a tenant.
///
/// A batch may contain no snapshots (tenant without stock rows); it still
/// claims its day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub tenant_id: TenantId,
    pub as_of: NaiveDate,
    pub snapshots: Vec<StoreSnapshot>,
}

impl SnapshotBatch {
    pub fn line_count(&self) -> usize {
        self.snapshots.iter().map(|s| s.lines.len()).sum()
    }

    fn restricted_to(mut self, stores: Option<&[StoreId]>) -> Self {
        if let Some(stores) = stores {
            self.snapshots.retain(|s| stores.contains(&s.snapshot.store_id));
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    /// A batch for this tenant and day was already persisted.
    #[error("snapshot batch already exists for {0}")]
    AlreadyExists(NaiveDate),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Persisted valuation snapshots.
///
/// Implementations must:
/// - persist a batch atomically (all snapshots and lines, or nothing)
/// - accept at most one batch per (tenant, as_of day)
/// - never update persisted lines
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn has_batch(&self, tenant_id: TenantId, as_of: NaiveDate) -> Result<bool, SnapshotStoreError>;

    async fn persist_batch(&self, batch: SnapshotBatch) -> Result<(), SnapshotStoreError>;

    /// The most recent batch with `as_of <= day`, restricted to `stores` when given.
    async fn load_batch_on_or_before(
        &self,
        tenant_id: TenantId,
        day: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<Option<SnapshotBatch>, SnapshotStoreError>;

    /// Snapshot headers with `from <= as_of <= to`, oldest first.
    async fn list_snapshots(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ValuationSnapshot>, SnapshotStoreError>;
}

#[async_trait::async_trait]
impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    async fn has_batch(&self, tenant_id: TenantId, as_of: NaiveDate) -> Result<bool, SnapshotStoreError> {
        (**self).has_batch(tenant_id, as_of).await
    }

    async fn persist_batch(&self, batch: SnapshotBatch) -> Result<(), SnapshotStoreError> {
        (**self).persist_batch(batch).await
    }

    async fn load_batch_on_or_before(
        &self,
        tenant_id: TenantId,
        day: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<Option<SnapshotBatch>, SnapshotStoreError> {
        (**self).load_batch_on_or_before(tenant_id, day, stores).await
    }

    async fn list_snapshots(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ValuationSnapshot>, SnapshotStoreError> {
        (**self).list_snapshots(tenant_id, from, to).await
    }
}

/// In-memory snapshot store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    batches: RwLock<HashMap<TenantId, BTreeMap<NaiveDate, SnapshotBatch>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> SnapshotStoreError {
    SnapshotStoreError::Storage("lock poisoned".to_string())
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn has_batch(&self, tenant_id: TenantId, as_of: NaiveDate) -> Result<bool, SnapshotStoreError> {
        let batches = self.batches.read().map_err(poisoned)?;
        Ok(batches
            .get(&tenant_id)
            .is_some_and(|days| days.contains_key(&as_of)))
    }

    async fn persist_batch(&self, batch: SnapshotBatch) -> Result<(), SnapshotStoreError> {
        for (idx, s) in batch.snapshots.iter().enumerate() {
            if s.snapshot.tenant_id != batch.tenant_id {
                return Err(SnapshotStoreError::TenantIsolation(format!(
                    "batch contains a foreign snapshot (index {idx})"
                )));
            }
        }

        let mut batches = self.batches.write().map_err(poisoned)?;
        let days = batches.entry(batch.tenant_id).or_default();
        if days.contains_key(&batch.as_of) {
            return Err(SnapshotStoreError::AlreadyExists(batch.as_of));
        }

        days.insert(batch.as_of, batch);
        Ok(())
    }

    async fn load_batch_on_or_before(
        &self,
        tenant_id: TenantId,
        day: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<Option<SnapshotBatch>, SnapshotStoreError> {
        let batches = self.batches.read().map_err(poisoned)?;
        Ok(batches
            .get(&tenant_id)
            .and_then(|days| days.range(..=day).next_back())
            .map(|(_, batch)| batch.clone().restricted_to(stores)))
    }

    async fn list_snapshots(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ValuationSnapshot>, SnapshotStoreError> {
        if from > to {
            return Ok(Vec::new());
        }

        let batches = self.batches.read().map_err(poisoned)?;
        Ok(batches
            .get(&tenant_id)
            .map(|days| {
                days.range(from..=to)
                    .flat_map(|(_, batch)| batch.snapshots.iter().map(|s| s.snapshot.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn batch(tenant_id: TenantId, store_id: StoreId, day: u32) -> SnapshotBatch {
        let created = Utc.with_ymd_and_hms(2026, 3, day, 23, 0, 0).unwrap();
        SnapshotBatch {
            tenant_id,
            as_of: created.date_naive(),
            snapshots: vec![StoreSnapshot {
                snapshot: ValuationSnapshot::new(tenant_id, store_id, created),
                lines: Vec::new(),
            }],
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn second_batch_for_the_same_day_is_rejected() {
        let store = InMemorySnapshotStore::new();
        let tenant_id = TenantId::new();

        store.persist_batch(batch(tenant_id, StoreId::new(), 1)).await.unwrap();
        let err = store
            .persist_batch(batch(tenant_id, StoreId::new(), 1))
            .await
            .unwrap_err();

        assert!(matches!(err, SnapshotStoreError::AlreadyExists(d) if d == day(1)));
        assert!(store.has_batch(tenant_id, day(1)).await.unwrap());
        assert!(!store.has_batch(TenantId::new(), day(1)).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_picks_latest_batch_not_after_the_day() {
        let store = InMemorySnapshotStore::new();
        let tenant_id = TenantId::new();
        let shop = StoreId::new();
        store.persist_batch(batch(tenant_id, shop, 1)).await.unwrap();
        store.persist_batch(batch(tenant_id, shop, 4)).await.unwrap();

        let found = store
            .load_batch_on_or_before(tenant_id, day(3), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.as_of, day(1));

        let none_before = store
            .load_batch_on_or_before(tenant_id, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(), None)
            .await
            .unwrap();
        assert!(none_before.is_none());

        let filtered = store
            .load_batch_on_or_before(tenant_id, day(4), Some(&[StoreId::new()]))
            .await
            .unwrap()
            .unwrap();
        assert!(filtered.snapshots.is_empty());

        assert_eq!(store.list_snapshots(tenant_id, day(1), day(4)).await.unwrap().len(), 2);
    }
}
