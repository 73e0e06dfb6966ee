use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use stockledger_core::{StoreId, TenantId};
use stockledger_inventory::{HistoryEntry, IdempotencyKey, StockKey, StockLevel, StockSettings};

use super::r#trait::{CommitOutcome, LedgerStore, LedgerStoreError, StockCommit};
use crate::history::query::{HistoryFilter, HistoryPage, Pagination};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    tenant_id: TenantId,
    key: StockKey,
}

#[derive(Debug, Default)]
struct LedgerState {
    levels: HashMap<RowKey, StockLevel>,
    history: Vec<HistoryEntry>,
    /// (tenant, idempotency key) -> position in `history`.
    recorded: HashMap<(TenantId, IdempotencyKey), usize>,
    next_sequence: u64,
}

/// In-memory stock ledger.
///
/// Intended for tests/dev. One lock guards rows and history together so a
/// commit is atomic with respect to every other reader and writer.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>, LedgerStoreError> {
        self.state
            .read()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerState>, LedgerStoreError> {
        self.state
            .write()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn link_product(&self, level: StockLevel) -> Result<StockLevel, LedgerStoreError> {
        let mut state = self.write()?;
        let row_key = RowKey {
            tenant_id: level.tenant_id,
            key: level.key(),
        };

        if state.levels.contains_key(&row_key) {
            return Err(LedgerStoreError::AlreadyLinked);
        }

        state.levels.insert(row_key, level.clone());
        Ok(level)
    }

    async fn update_settings(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
    ) -> Result<StockLevel, LedgerStoreError> {
        let mut state = self.write()?;
        let level = state
            .levels
            .get_mut(&RowKey { tenant_id, key })
            .ok_or(LedgerStoreError::NotFound)?;

        level.apply_settings(&settings);
        Ok(level.clone())
    }

    async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerStoreError> {
        let mut state = self.write()?;
        state
            .levels
            .remove(&RowKey { tenant_id, key })
            .map(|_| ())
            .ok_or(LedgerStoreError::NotFound)
    }

    async fn load_stock_level(
        &self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> Result<Option<StockLevel>, LedgerStoreError> {
        let state = self.read()?;
        Ok(state.levels.get(&RowKey { tenant_id, key }).cloned())
    }

    async fn list_stock_levels(
        &self,
        tenant_id: TenantId,
        stores: Option<&[StoreId]>,
    ) -> Result<Vec<StockLevel>, LedgerStoreError> {
        let state = self.read()?;
        let mut levels: Vec<StockLevel> = state
            .levels
            .iter()
            .filter(|(k, _)| k.tenant_id == tenant_id)
            .filter(|(k, _)| stores.is_none_or(|s| s.contains(&k.key.store_id)))
            .map(|(_, level)| level.clone())
            .collect();

        levels.sort_by_key(|l| l.key());
        Ok(levels)
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerStoreError> {
        let state = self.read()?;
        let tenants: BTreeSet<TenantId> = state.levels.keys().map(|k| k.tenant_id).collect();
        Ok(tenants.into_iter().collect())
    }

    async fn find_entry(
        &self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<HistoryEntry>, LedgerStoreError> {
        let state = self.read()?;
        Ok(state
            .recorded
            .get(&(tenant_id, *key))
            .and_then(|idx| state.history.get(*idx))
            .cloned())
    }

    async fn commit_change(&self, commit: StockCommit) -> Result<CommitOutcome, LedgerStoreError> {
        let StockCommit {
            expected_version,
            mut entry,
        } = commit;
        let tenant_id = entry.tenant_id;
        let idem = entry.idempotency_key();

        let mut state = self.write()?;

        if let Some(existing) = state
            .recorded
            .get(&(tenant_id, idem))
            .and_then(|idx| state.history.get(*idx))
        {
            return Ok(CommitOutcome::Duplicate(existing.clone()));
        }

        let row_key = RowKey {
            tenant_id,
            key: StockKey::new(entry.store_id, entry.product_id),
        };
        let current = state
            .levels
            .get(&row_key)
            .ok_or(LedgerStoreError::NotFound)?;

        if !expected_version.matches(current.version) {
            return Err(LedgerStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {}",
                current.version
            )));
        }
        if current.units.checked_add(entry.adjustment) != Some(entry.stock_after) {
            return Err(LedgerStoreError::Concurrency(format!(
                "entry was planned against {} units, row holds {}",
                entry.stock_before(),
                current.units
            )));
        }

        state.next_sequence += 1;
        entry.sequence = state.next_sequence;

        let level = match state.levels.get_mut(&row_key) {
            Some(level) => {
                level.units = entry.stock_after;
                level.version += 1;
                level.clone()
            }
            None => return Err(LedgerStoreError::NotFound),
        };

        let position = state.history.len();
        state.history.push(entry.clone());
        state.recorded.insert((tenant_id, idem), position);

        Ok(CommitOutcome::Applied { entry, level })
    }

    async fn query_history(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<HistoryPage, LedgerStoreError> {
        let state = self.read()?;
        let mut matching: Vec<&HistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.tenant_id == tenant_id && filter.matches(e))
            .collect();
        matching.sort_by_key(|e| (e.created_date, e.sequence));

        let total = matching.len() as u64;
        let entries = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(HistoryPage::new(entries, total, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use stockledger_core::{ExpectedVersion, ProductId, UserId};
    use stockledger_inventory::{ChangeSource, Direction, Reason, StockChange};

    fn settings() -> StockSettings {
        StockSettings {
            price: dec!(2500),
            cost: dec!(1000),
            minimum_stock_level: dec!(0),
            is_sellable: true,
        }
    }

    async fn linked(store: &InMemoryLedgerStore, tenant_id: TenantId, units: Decimal) -> StockLevel {
        let key = StockKey::new(StoreId::new(), ProductId::new());
        store
            .link_product(StockLevel::linked(tenant_id, key, settings(), units))
            .await
            .unwrap()
    }

    fn planned(level: &StockLevel, source: ChangeSource, delta: Decimal) -> StockCommit {
        let change = StockChange {
            store_id: level.store_id,
            product_id: level.product_id,
            user_id: UserId::new(),
            reason: Reason::Receive,
            source,
            source_name: None,
            delta,
            direction: Direction::Add,
        };
        let movement = level.plan(&change).unwrap();
        StockCommit {
            expected_version: ExpectedVersion::exact(movement.based_on_version),
            entry: HistoryEntry::record(level.tenant_id, &change, &movement, chrono::Utc::now()),
        }
    }

    #[tokio::test]
    async fn commit_updates_row_and_appends_entry() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let level = linked(&store, tenant_id, dec!(0)).await;

        let outcome = store
            .commit_change(planned(&level, ChangeSource::purchase_line(1, 1), dec!(10)))
            .await
            .unwrap();

        let CommitOutcome::Applied { entry, level: after } = outcome else {
            panic!("expected applied commit");
        };
        assert_eq!(entry.sequence, 1);
        assert_eq!(after.units, dec!(10));
        assert_eq!(after.version, 1);

        let page = store
            .query_history(tenant_id, &HistoryFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_side_effects() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let level = linked(&store, tenant_id, dec!(0)).await;

        store
            .commit_change(planned(&level, ChangeSource::purchase_line(1, 1), dec!(10)))
            .await
            .unwrap();

        // Planned against version 0, row is now at version 1.
        let err = store
            .commit_change(planned(&level, ChangeSource::purchase_line(1, 2), dec!(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerStoreError::Concurrency(_)));

        let row = store
            .load_stock_level(tenant_id, level.key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.units, dec!(10));
    }

    #[tokio::test]
    async fn recorded_key_short_circuits_to_duplicate() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let level = linked(&store, tenant_id, dec!(0)).await;
        let commit = planned(&level, ChangeSource::purchase_line(1, 1), dec!(10));

        store.commit_change(commit.clone()).await.unwrap();
        let outcome = store.commit_change(commit).await.unwrap();

        assert!(matches!(outcome, CommitOutcome::Duplicate(ref e) if e.sequence == 1));
    }

    #[tokio::test]
    async fn rows_are_invisible_to_other_tenants() {
        let store = InMemoryLedgerStore::new();
        let level = linked(&store, TenantId::new(), dec!(3)).await;

        let other = TenantId::new();
        assert!(store.load_stock_level(other, level.key()).await.unwrap().is_none());
        assert!(store.list_stock_levels(other, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn linking_twice_fails() {
        let store = InMemoryLedgerStore::new();
        let level = linked(&store, TenantId::new(), dec!(0)).await;

        let err = store.link_product(level).await.unwrap_err();
        assert!(matches!(err, LedgerStoreError::AlreadyLinked));
    }
}
