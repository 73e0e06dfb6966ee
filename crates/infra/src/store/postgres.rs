//! Postgres-backed stock ledger.
//!
//! `stock_levels` holds one mutable row per (tenant, store, product);
//! `stock_history` is append-only. A commit runs in one transaction:
//!
//! 1. look up the idempotency key; a hit short-circuits to `Duplicate`
//! 2. compare-and-swap the stock row on its version
//! 3. insert the history entry
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerStoreError |
//! |------------|----------------------|------------------|
//! | Database (unique violation) | `23505` | `Concurrency` (or `Duplicate` outcome on the history insert) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Other | N/A | `Storage` |

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{ProductId, StoreId, TenantId, UserId};
use stockledger_inventory::{
    ChangeSource, DocumentKind, HistoryEntry, HistoryEntryId, IdempotencyKey, Reason, StockKey,
    StockLevel, StockSettings,
};

use super::r#trait::{CommitOutcome, LedgerStore, LedgerStoreError, StockCommit};
use crate::history::query::{HistoryFilter, HistoryPage, Pagination};

const LEVEL_COLUMNS: &str = "tenant_id, store_id, product_id, units, price, cost, \
                             minimum_stock_level, is_sellable, version";

const ENTRY_COLUMNS: &str = "id, sequence, tenant_id, store_id, product_id, user_id, reason, \
                             document_kind, change_source_reg_no, line_source_reg_no, \
                             change_source_name, adjustment, stock_after, created_date";

/// Postgres-backed stock levels + history ledger.
///
/// Every statement carries `tenant_id` in its WHERE clause.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn find_entry_in(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<HistoryEntry>, LedgerStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM stock_history
            WHERE tenant_id = $1
                AND document_kind = $2
                AND change_source_reg_no = $3
                AND store_id = $4
                AND product_id = $5
                AND line_source_reg_no = $6
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(key.document.kind.code())
        .bind(key.document.reg_no)
        .bind(key.store_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.line_reg_no)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("find_entry", e))?;

        row.as_ref().map(entry_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, level),
        fields(
            tenant_id = %level.tenant_id.as_uuid(),
            store_id = %level.store_id.as_uuid(),
            product_id = %level.product_id.as_uuid()
        ),
        err
    )]
    async fn link_product(&self, level: StockLevel) -> Result<StockLevel, LedgerStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_levels ({LEVEL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
            RETURNING {LEVEL_COLUMNS}
            "#
        ))
        .bind(level.tenant_id.as_uuid())
        .bind(level.store_id.as_uuid())
        .bind(level.product_id.as_uuid())
        .bind(level.units)
        .bind(level.price)
        .bind(level.cost)
        .bind(level.minimum_stock_level)
        .bind(level.is_sellable)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerStoreError::AlreadyLinked
            } else {
                map_sqlx_error("link_product", e)
            }
        })?;

        level_from_row(&row)
    }

    #[instrument(
        skip(self, settings),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %key.store_id.as_uuid(),
            product_id = %key.product_id.as_uuid()
        ),
        err
    )]
    async fn update_settings(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
    ) -> Result<StockLevel, LedgerStoreError> {
        // Units and version are left alone: settings never race with stock movements.
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_levels
            SET price = $4, cost = $5, minimum_stock_level = $6, is_sellable = $7
            WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3
            RETURNING {LEVEL_COLUMNS}
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(key.store_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(settings.price)
        .bind(settings.cost)
        .bind(settings.minimum_stock_level)
        .bind(settings.is_sellable)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_settings", e))?
        .ok_or(LedgerStoreError::NotFound)?;

        level_from_row(&row)
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
    async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM stock_levels
            WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key.store_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unlink_product", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerStoreError::NotFound);
        }
        Ok(())
    }

    async fn load_stock_level(
        &self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> Result<Option<StockLevel>, LedgerStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {LEVEL_COLUMNS}
            FROM stock_levels
            WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(key.store_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stock_level", e))?;

        row.as_ref().map(level_from_row).transpose()
    }

    #[instrument(
        skip(self, stores),
        fields(tenant_id = %tenant_id.as_uuid(), row_count = tracing::field::Empty),
        err
    )]
    async fn list_stock_levels(
        &self,
        tenant_id: TenantId,
        stores: Option<&[StoreId]>,
    ) -> Result<Vec<StockLevel>, LedgerStoreError> {
        let store_ids: Option<Vec<uuid::Uuid>> =
            stores.map(|s| s.iter().map(|id| *id.as_uuid()).collect());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {LEVEL_COLUMNS}
            FROM stock_levels
            WHERE tenant_id = $1
                AND ($2::uuid[] IS NULL OR store_id = ANY($2))
            ORDER BY store_id, product_id
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(store_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_levels", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(level_from_row).collect()
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerStoreError> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM stock_levels ORDER BY tenant_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_tenants", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("tenant_id")
                    .map(TenantId::from_uuid)
                    .map_err(|e| map_sqlx_error("list_tenants", e))
            })
            .collect()
    }

    async fn find_entry(
        &self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<HistoryEntry>, LedgerStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let found = Self::find_entry_in(&mut tx, tenant_id, key).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(found)
    }

    #[instrument(
        skip(self, commit),
        fields(
            tenant_id = %commit.entry.tenant_id.as_uuid(),
            store_id = %commit.entry.store_id.as_uuid(),
            product_id = %commit.entry.product_id.as_uuid(),
            expected_version = ?commit.expected_version,
            duplicate = tracing::field::Empty,
            sequence = tracing::field::Empty
        ),
        err
    )]
    async fn commit_change(&self, commit: StockCommit) -> Result<CommitOutcome, LedgerStoreError> {
        let StockCommit {
            expected_version,
            mut entry,
        } = commit;
        let tenant_id = entry.tenant_id;
        let idem = entry.idempotency_key();
        let span = Span::current();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(existing) = Self::find_entry_in(&mut tx, tenant_id, &idem).await? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            span.record("duplicate", true);
            return Ok(CommitOutcome::Duplicate(existing));
        }

        let expected = expected_version.value() as i64;

        // Compare-and-swap on version; the units guard rejects an entry whose
        // adjustment does not lead from the stored units to `stock_after`.
        let updated = sqlx::query(&format!(
            r#"
            UPDATE stock_levels
            SET units = $4, version = version + 1
            WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3
                AND version = $5
                AND units + $6 = $4
            RETURNING {LEVEL_COLUMNS}
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(entry.store_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.stock_after)
        .bind(expected)
        .bind(entry.adjustment)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_stock_level", e))?;

        let Some(level_row) = updated else {
            let exists = sqlx::query(
                r#"
                SELECT 1 AS present
                FROM stock_levels
                WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(entry.store_id.as_uuid())
            .bind(entry.product_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_stock_level", e))?
            .is_some();

            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;

            return Err(if exists {
                LedgerStoreError::Concurrency(format!(
                    "stock level moved since version {expected_version:?}"
                ))
            } else {
                LedgerStoreError::NotFound
            });
        };
        let level = level_from_row(&level_row)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_history (
                id,
                tenant_id,
                store_id,
                product_id,
                user_id,
                reason,
                document_kind,
                change_source_reg_no,
                line_source_reg_no,
                change_source_name,
                adjustment,
                stock_after,
                created_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING sequence
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(entry.store_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.reason.code())
        .bind(idem.document.kind.code())
        .bind(idem.document.reg_no)
        .bind(idem.line_reg_no)
        .bind(&entry.change_source_name)
        .bind(entry.adjustment)
        .bind(entry.stock_after)
        .bind(entry.created_date)
        .fetch_one(&mut *tx)
        .await;

        let sequence: i64 = match inserted {
            Ok(row) => row
                .try_get("sequence")
                .map_err(|e| map_sqlx_error("insert_history", e))?,
            Err(e) if is_unique_violation(&e) => {
                // A concurrent writer recorded the same line first.
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return match self.find_entry(tenant_id, &idem).await? {
                    Some(existing) => Ok(CommitOutcome::Duplicate(existing)),
                    None => Err(LedgerStoreError::Concurrency(
                        "idempotency key collided but no entry is visible".to_string(),
                    )),
                };
            }
            Err(e) => return Err(map_sqlx_error("insert_history", e)),
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        entry.sequence = sequence as u64;
        span.record("sequence", entry.sequence);
        Ok(CommitOutcome::Applied { entry, level })
    }

    #[instrument(
        skip(self, filter),
        fields(tenant_id = %tenant_id.as_uuid(), entry_count = tracing::field::Empty),
        err
    )]
    async fn query_history(
        &self,
        tenant_id: TenantId,
        filter: &HistoryFilter,
        pagination: Pagination,
    ) -> Result<HistoryPage, LedgerStoreError> {
        let store_param = filter.store_id.map(|id| *id.as_uuid());
        let product_param = filter.product_id.map(|id| *id.as_uuid());
        let user_param = filter.user_id.map(|id| *id.as_uuid());
        let reasons: Vec<&str> = filter.reasons.iter().map(|r| r.code()).collect();
        let kind_param = filter.document.map(|d| d.kind.code());
        let reg_no_param = filter.document.map(|d| d.reg_no);

        const WHERE: &str = r#"
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR store_id = $2)
                AND ($3::uuid IS NULL OR product_id = $3)
                AND ($4::uuid IS NULL OR user_id = $4)
                AND (cardinality($5::text[]) = 0 OR reason = ANY($5))
                AND ($6::text IS NULL OR document_kind = $6)
                AND ($7::bigint IS NULL OR change_source_reg_no = $7)
                AND ($8::timestamptz IS NULL OR created_date >= $8)
                AND ($9::timestamptz IS NULL OR created_date < $9)
        "#;

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM stock_history {WHERE}"))
            .bind(tenant_id.as_uuid())
            .bind(store_param)
            .bind(product_param)
            .bind(user_param)
            .bind(&reasons)
            .bind(kind_param)
            .bind(reg_no_param)
            .bind(filter.created_from)
            .bind(filter.created_until)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_history", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_history", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM stock_history
            {WHERE}
            ORDER BY created_date ASC, sequence ASC
            LIMIT $10 OFFSET $11
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(store_param)
        .bind(product_param)
        .bind(user_param)
        .bind(&reasons)
        .bind(kind_param)
        .bind(reg_no_param)
        .bind(filter.created_from)
        .bind(filter.created_until)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_history", e))?;

        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("entry_count", entries.len());

        Ok(HistoryPage::new(entries, total.max(0) as u64, pagination))
    }
}

fn level_from_row(row: &PgRow) -> Result<StockLevel, LedgerStoreError> {
    let decode = |e| map_sqlx_error("decode_stock_level", e);
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(StockLevel {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        store_id: StoreId::from_uuid(row.try_get("store_id").map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode)?),
        units: row.try_get::<Decimal, _>("units").map_err(decode)?,
        price: row.try_get::<Decimal, _>("price").map_err(decode)?,
        cost: row.try_get::<Decimal, _>("cost").map_err(decode)?,
        minimum_stock_level: row.try_get::<Decimal, _>("minimum_stock_level").map_err(decode)?,
        is_sellable: row.try_get("is_sellable").map_err(decode)?,
        version: version as u64,
    })
}

fn entry_from_row(row: &PgRow) -> Result<HistoryEntry, LedgerStoreError> {
    let decode = |e| map_sqlx_error("decode_history_entry", e);

    let reason: String = row.try_get("reason").map_err(decode)?;
    let reason: Reason = reason
        .parse()
        .map_err(|e| LedgerStoreError::Storage(format!("invalid stored reason: {e}")))?;
    let kind: String = row.try_get("document_kind").map_err(decode)?;
    let kind: DocumentKind = kind
        .parse()
        .map_err(|e| LedgerStoreError::Storage(format!("invalid stored document kind: {e}")))?;
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;

    Ok(HistoryEntry {
        id: HistoryEntryId::from_uuid(row.try_get("id").map_err(decode)?),
        sequence: sequence as u64,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        store_id: StoreId::from_uuid(row.try_get("store_id").map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        reason,
        source: ChangeSource::from_parts(
            kind,
            row.try_get("change_source_reg_no").map_err(decode)?,
            row.try_get("line_source_reg_no").map_err(decode)?,
        ),
        change_source_name: row.try_get("change_source_name").map_err(decode)?,
        adjustment: row.try_get::<Decimal, _>("adjustment").map_err(decode)?,
        stock_after: row.try_get::<Decimal, _>("stock_after").map_err(decode)?,
        created_date: row.try_get("created_date").map_err(decode)?,
    })
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerStoreError::Concurrency(msg),
                _ => LedgerStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => LedgerStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
