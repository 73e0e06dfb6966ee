//! History ledger query model.
//!
//! All queries are tenant-scoped, read-only and paginated. Results are ordered
//! chronologically: `created_date` ascending, then insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, StoreId, UserId};
use stockledger_inventory::{DocumentRef, HistoryEntry, Reason};

/// Pagination parameters for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

/// Filter criteria for history queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub store_id: Option<StoreId>,
    pub product_id: Option<ProductId>,
    pub user_id: Option<UserId>,
    /// Empty means any reason.
    pub reasons: Vec<Reason>,
    pub document: Option<DocumentRef>,
    /// Inclusive lower bound.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn for_stock(store_id: StoreId, product_id: ProductId) -> Self {
        Self {
            store_id: Some(store_id),
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn for_document(document: DocumentRef) -> Self {
        Self {
            document: Some(document),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reasons.push(reason);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_until = Some(until);
        self
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.store_id.is_none_or(|s| entry.store_id == s)
            && self.product_id.is_none_or(|p| entry.product_id == p)
            && self.user_id.is_none_or(|u| entry.user_id == u)
            && (self.reasons.is_empty() || self.reasons.contains(&entry.reason))
            && self.document.is_none_or(|d| entry.source.document() == d)
            && self.created_from.is_none_or(|from| entry.created_date >= from)
            && self.created_until.is_none_or(|until| entry.created_date < until)
    }
}

/// Paginated history query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Total number of entries matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl HistoryPage {
    pub fn new(entries: Vec<HistoryEntry>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > pagination.offset as u64 + entries.len() as u64;
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }
}
