//! Immutable audit entries of the history ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{ProductId, StoreId, TenantId, UserId};
use stockledger_events::Event;

use crate::change::{StockChange, StockMovement};
use crate::reason::Reason;
use crate::source::{ChangeSource, IdempotencyKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryEntryId(Uuid);

impl HistoryEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HistoryEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for HistoryEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One recorded stock mutation. Written once, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    /// Insertion order assigned by the store; 0 until committed.
    pub sequence: u64,
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub reason: Reason,
    pub source: ChangeSource,
    pub change_source_name: String,
    pub adjustment: Decimal,
    pub stock_after: Decimal,
    pub created_date: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn record(
        tenant_id: TenantId,
        change: &StockChange,
        movement: &StockMovement,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId::new(),
            sequence: 0,
            tenant_id,
            store_id: change.store_id,
            product_id: change.product_id,
            user_id: change.user_id,
            reason: change.reason,
            source: change.source,
            change_source_name: change.change_source_name(),
            adjustment: movement.adjustment,
            stock_after: movement.stock_after,
            created_date,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.source, self.store_id, self.product_id)
    }

    pub fn stock_before(&self) -> Decimal {
        self.stock_after - self.adjustment
    }
}

/// Event: a stock change was committed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChanged {
    pub history_entry_id: HistoryEntryId,
    pub reason: Reason,
    pub source: ChangeSource,
    pub adjustment: Decimal,
    pub stock_after: Decimal,
    pub below_minimum: bool,
    pub occurred_at: DateTime<Utc>,
}

impl StockChanged {
    pub fn from_entry(entry: &HistoryEntry, below_minimum: bool) -> Self {
        Self {
            history_entry_id: entry.id,
            reason: entry.reason,
            source: entry.source,
            adjustment: entry.adjustment,
            stock_after: entry.stock_after,
            below_minimum,
            occurred_at: entry.created_date,
        }
    }
}

impl Event for StockChanged {
    fn event_type(&self) -> &'static str {
        "inventory.stock.changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
