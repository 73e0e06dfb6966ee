//! Read side of the history ledger: paginated queries and audit helpers.

pub mod audit;
pub mod query;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use stockledger_core::TenantId;
use stockledger_inventory::{DocumentRef, HistoryEntry, StockKey};

pub use audit::{DocumentAudit, DuplicateGroup, ExpectedLine, Reconciliation};
pub use query::{HistoryFilter, HistoryPage, Pagination};

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Read-only access to the append-only history ledger.
#[derive(Debug, Clone)]
pub struct HistoryLedger<S> {
    store: S,
}

impl<S> HistoryLedger<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id.as_uuid()), err)]
    pub async fn query(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<HistoryPage, LedgerError> {
        Ok(self.store.query_history(tenant_id, filter, pagination).await?)
    }

    /// Every entry matching `filter`, fetched page by page.
    pub async fn scan(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        let mut pagination = Pagination::new(Some(Pagination::MAX_LIMIT), None);
        let mut entries = Vec::new();

        loop {
            let page = self.store.query_history(tenant_id, filter, pagination).await?;
            let has_more = page.has_more && !page.entries.is_empty();
            entries.extend(page.entries);
            if !has_more {
                break;
            }
            pagination = pagination.next();
        }

        debug!(count = entries.len(), "history scan complete");
        Ok(entries)
    }

    pub async fn entries_for_document(
        &self,
        tenant_id: TenantId,
        document: DocumentRef,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.scan(tenant_id, &HistoryFilter::for_document(document)).await
    }

    #[instrument(
        skip(self, expected),
        fields(tenant_id = %tenant_id.as_uuid(), document = %document.label()),
        err
    )]
    pub async fn audit_document(
        &self,
        tenant_id: TenantId,
        document: DocumentRef,
        expected: &[ExpectedLine],
    ) -> Result<DocumentAudit, LedgerError> {
        let entries = self.entries_for_document(tenant_id, document).await?;
        Ok(audit::audit_entries(document, &entries, expected))
    }

    pub async fn find_duplicates(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
    ) -> Result<Vec<DuplicateGroup>, LedgerError> {
        let entries = self.scan(tenant_id, filter).await?;
        Ok(audit::group_duplicates(&entries))
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %key.store_id.as_uuid(),
            product_id = %key.product_id.as_uuid()
        ),
        err
    )]
    pub async fn reconcile(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        opening_units: Decimal,
    ) -> Result<Reconciliation, LedgerError> {
        let level = self
            .store
            .load_stock_level(tenant_id, key)
            .await?
            .ok_or_else(|| LedgerError::NotFound("stock level".to_string()))?;
        let entries = self
            .scan(tenant_id, &HistoryFilter::for_stock(key.store_id, key.product_id))
            .await?;

        Ok(audit::reconcile_entries(key, opening_units, level.units, &entries))
    }
}
