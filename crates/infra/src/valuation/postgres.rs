//! Postgres-backed snapshot store.
//!
//! A batch is written in one transaction. The `valuation_snapshot_runs` marker
//! row goes in first; its primary key on (tenant_id, as_of) is what rejects a
//! second batch for the same day, including batches with no snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use stockledger_core::{ProductId, StoreId, TenantId};
use stockledger_inventory::{
    ProductDescriptor, SnapshotId, ValuationFigures, ValuationSnapshot, ValuationSnapshotLine,
};

use super::store::{SnapshotBatch, SnapshotStore, SnapshotStoreError, StoreSnapshot};
use crate::store::postgres::is_unique_violation;

#[derive(Debug, Clone)]
pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn has_batch(&self, tenant_id: TenantId, as_of: NaiveDate) -> Result<bool, SnapshotStoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present
            FROM valuation_snapshot_runs
            WHERE tenant_id = $1 AND as_of = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(as_of)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_batch", e))?;

        Ok(row.is_some())
    }

    #[instrument(
        skip(self, batch),
        fields(
            tenant_id = %batch.tenant_id.as_uuid(),
            as_of = %batch.as_of,
            snapshot_count = batch.snapshots.len(),
            line_count = batch.line_count()
        ),
        err
    )]
    async fn persist_batch(&self, batch: SnapshotBatch) -> Result<(), SnapshotStoreError> {
        for (idx, s) in batch.snapshots.iter().enumerate() {
            if s.snapshot.tenant_id != batch.tenant_id {
                return Err(SnapshotStoreError::TenantIsolation(format!(
                    "batch contains a foreign snapshot (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO valuation_snapshot_runs (tenant_id, as_of)
            VALUES ($1, $2)
            "#,
        )
        .bind(batch.tenant_id.as_uuid())
        .bind(batch.as_of)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SnapshotStoreError::AlreadyExists(batch.as_of)
            } else {
                map_sqlx_error("insert_run", e)
            }
        })?;

        for StoreSnapshot { snapshot, lines } in &batch.snapshots {
            sqlx::query(
                r#"
                INSERT INTO valuation_snapshots (id, tenant_id, store_id, as_of, created_date)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(snapshot.id.as_uuid())
            .bind(snapshot.tenant_id.as_uuid())
            .bind(snapshot.store_id.as_uuid())
            .bind(snapshot.as_of)
            .bind(snapshot.created_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_snapshot", e))?;

            for line in lines {
                sqlx::query(
                    r#"
                    INSERT INTO valuation_snapshot_lines (
                        snapshot_id,
                        tenant_id,
                        store_id,
                        product_id,
                        product_name,
                        sku,
                        barcode,
                        category_name,
                        price,
                        cost,
                        units,
                        is_sellable,
                        inventory_value,
                        retail_value,
                        potential_profit,
                        margin
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                    "#,
                )
                .bind(line.snapshot_id.as_uuid())
                .bind(snapshot.tenant_id.as_uuid())
                .bind(line.store_id.as_uuid())
                .bind(line.product_id.as_uuid())
                .bind(&line.product.name)
                .bind(&line.product.sku)
                .bind(&line.product.barcode)
                .bind(&line.product.category_name)
                .bind(line.price)
                .bind(line.cost)
                .bind(line.units)
                .bind(line.is_sellable)
                .bind(line.figures.inventory_value)
                .bind(line.figures.retail_value)
                .bind(line.figures.potential_profit)
                .bind(line.figures.margin)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_snapshot_line", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(())
    }

    #[instrument(
        skip(self, stores),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            day = %day,
            batch_found = tracing::field::Empty
        ),
        err
    )]
    async fn load_batch_on_or_before(
        &self,
        tenant_id: TenantId,
        day: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<Option<SnapshotBatch>, SnapshotStoreError> {
        let run = sqlx::query(
            r#"
            SELECT as_of
            FROM valuation_snapshot_runs
            WHERE tenant_id = $1 AND as_of <= $2
            ORDER BY as_of DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(day)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_run", e))?;

        let Some(run) = run else {
            Span::current().record("batch_found", false);
            return Ok(None);
        };
        let as_of: NaiveDate = run
            .try_get("as_of")
            .map_err(|e| map_sqlx_error("find_run", e))?;

        let store_ids: Option<Vec<uuid::Uuid>> =
            stores.map(|s| s.iter().map(|id| *id.as_uuid()).collect());

        let snapshot_rows = sqlx::query(
            r#"
            SELECT id, tenant_id, store_id, as_of, created_date
            FROM valuation_snapshots
            WHERE tenant_id = $1 AND as_of = $2
                AND ($3::uuid[] IS NULL OR store_id = ANY($3))
            ORDER BY store_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(as_of)
        .bind(&store_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_snapshots", e))?;

        let snapshots = snapshot_rows
            .iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot_ids: Vec<uuid::Uuid> = snapshots.iter().map(|s| *s.id.as_uuid()).collect();
        let line_rows = sqlx::query(
            r#"
            SELECT
                snapshot_id,
                store_id,
                product_id,
                product_name,
                sku,
                barcode,
                category_name,
                price,
                cost,
                units,
                is_sellable,
                inventory_value,
                retail_value,
                potential_profit,
                margin
            FROM valuation_snapshot_lines
            WHERE tenant_id = $1 AND snapshot_id = ANY($2)
            ORDER BY snapshot_id, product_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&snapshot_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_snapshot_lines", e))?;

        let mut lines_by_snapshot: HashMap<SnapshotId, Vec<ValuationSnapshotLine>> = HashMap::new();
        for row in &line_rows {
            let line = line_from_row(row)?;
            lines_by_snapshot.entry(line.snapshot_id).or_default().push(line);
        }

        let snapshots = snapshots
            .into_iter()
            .map(|snapshot| StoreSnapshot {
                lines: lines_by_snapshot.remove(&snapshot.id).unwrap_or_default(),
                snapshot,
            })
            .collect();

        Span::current().record("batch_found", true);
        Ok(Some(SnapshotBatch {
            tenant_id,
            as_of,
            snapshots,
        }))
    }

    async fn list_snapshots(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ValuationSnapshot>, SnapshotStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, store_id, as_of, created_date
            FROM valuation_snapshots
            WHERE tenant_id = $1 AND as_of >= $2 AND as_of <= $3
            ORDER BY as_of, store_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_snapshots", e))?;

        rows.iter().map(snapshot_from_row).collect()
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<ValuationSnapshot, SnapshotStoreError> {
    let decode = |e| map_sqlx_error("decode_snapshot", e);
    let created_date: DateTime<Utc> = row.try_get("created_date").map_err(decode)?;

    Ok(ValuationSnapshot {
        id: SnapshotId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        store_id: StoreId::from_uuid(row.try_get("store_id").map_err(decode)?),
        as_of: row.try_get("as_of").map_err(decode)?,
        created_date,
    })
}

fn line_from_row(row: &PgRow) -> Result<ValuationSnapshotLine, SnapshotStoreError> {
    let decode = |e| map_sqlx_error("decode_snapshot_line", e);

    // Stored figures are read back as persisted, never recomputed.
    Ok(ValuationSnapshotLine {
        snapshot_id: SnapshotId::from_uuid(row.try_get("snapshot_id").map_err(decode)?),
        store_id: StoreId::from_uuid(row.try_get("store_id").map_err(decode)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode)?),
        product: ProductDescriptor {
            name: row.try_get("product_name").map_err(decode)?,
            sku: row.try_get("sku").map_err(decode)?,
            barcode: row.try_get("barcode").map_err(decode)?,
            category_name: row.try_get("category_name").map_err(decode)?,
        },
        price: row.try_get::<Decimal, _>("price").map_err(decode)?,
        cost: row.try_get::<Decimal, _>("cost").map_err(decode)?,
        units: row.try_get::<Decimal, _>("units").map_err(decode)?,
        is_sellable: row.try_get("is_sellable").map_err(decode)?,
        figures: ValuationFigures {
            inventory_value: row.try_get::<Decimal, _>("inventory_value").map_err(decode)?,
            retail_value: row.try_get::<Decimal, _>("retail_value").map_err(decode)?,
            potential_profit: row.try_get::<Decimal, _>("potential_profit").map_err(decode)?,
            margin: row.try_get::<Decimal, _>("margin").map_err(decode)?,
        },
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SnapshotStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            SnapshotStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            SnapshotStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => SnapshotStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
