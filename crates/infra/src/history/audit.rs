//! Consistency checks over recorded history.
//!
//! The writer enforces idempotency for everything it records, but history
//! imported from older systems may not have gone through it. These checks
//! make such gaps visible without modifying the ledger.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, StoreId};
use stockledger_inventory::{DocumentRef, HistoryEntry, HistoryEntryId, IdempotencyKey, StockKey};

/// A document line a producer expects to find in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpectedLine {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub line_reg_no: i64,
}

impl ExpectedLine {
    pub fn new(store_id: StoreId, product_id: ProductId, line_reg_no: i64) -> Self {
        Self {
            store_id,
            product_id,
            line_reg_no,
        }
    }

    fn key(&self, document: DocumentRef) -> IdempotencyKey {
        IdempotencyKey {
            document,
            store_id: self.store_id,
            product_id: self.product_id,
            line_reg_no: self.line_reg_no,
        }
    }
}

/// Entries sharing one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub key: IdempotencyKey,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAudit {
    pub document: DocumentRef,
    pub duplicates: Vec<DuplicateGroup>,
    pub missing: Vec<ExpectedLine>,
    pub unexpected: Vec<HistoryEntry>,
}

impl DocumentAudit {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Live units versus `opening_units + sum(adjustment)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub key: StockKey,
    pub opening_units: Decimal,
    pub ledger_sum: Decimal,
    pub live_units: Decimal,
    /// `live_units - (opening_units + ledger_sum)`.
    pub drift: Decimal,
    /// Entries whose `stock_before` differs from the previous entry's `stock_after`.
    pub seam_breaks: Vec<HistoryEntryId>,
}

impl Reconciliation {
    pub fn expected_units(&self) -> Decimal {
        self.opening_units + self.ledger_sum
    }

    pub fn is_balanced(&self) -> bool {
        self.drift.is_zero() && self.seam_breaks.is_empty()
    }
}

/// Group entries by idempotency key and keep groups with more than one entry.
pub fn group_duplicates(entries: &[HistoryEntry]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<IdempotencyKey, Vec<HistoryEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.idempotency_key()).or_default().push(entry.clone());
    }

    groups
        .into_iter()
        .filter(|(_, entries)| entries.len() > 1)
        .map(|(key, entries)| DuplicateGroup { key, entries })
        .collect()
}

/// Compare a document's recorded entries with the lines it should have produced.
pub fn audit_entries(
    document: DocumentRef,
    entries: &[HistoryEntry],
    expected: &[ExpectedLine],
) -> DocumentAudit {
    let expected_keys: BTreeSet<IdempotencyKey> = expected.iter().map(|l| l.key(document)).collect();
    let recorded_keys: BTreeSet<IdempotencyKey> = entries
        .iter()
        .filter(|e| e.source.document() == document)
        .map(HistoryEntry::idempotency_key)
        .collect();

    let missing = expected
        .iter()
        .filter(|l| !recorded_keys.contains(&l.key(document)))
        .copied()
        .collect();

    let unexpected = entries
        .iter()
        .filter(|e| !expected_keys.contains(&e.idempotency_key()))
        .cloned()
        .collect();

    DocumentAudit {
        document,
        duplicates: group_duplicates(entries),
        missing,
        unexpected,
    }
}

/// Walk one stock row's entries in commit order and compare against live units.
pub fn reconcile_entries(
    key: StockKey,
    opening_units: Decimal,
    live_units: Decimal,
    entries: &[HistoryEntry],
) -> Reconciliation {
    let mut ordered: Vec<&HistoryEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    let mut running = opening_units;
    let mut ledger_sum = Decimal::ZERO;
    let mut seam_breaks = Vec::new();
    for entry in ordered {
        if entry.stock_before() != running {
            seam_breaks.push(entry.id);
        }
        running = entry.stock_after;
        ledger_sum += entry.adjustment;
    }

    Reconciliation {
        key,
        opening_units,
        ledger_sum,
        live_units,
        drift: live_units - (opening_units + ledger_sum),
        seam_breaks,
    }
}
