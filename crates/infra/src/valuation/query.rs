//! "What was my inventory worth on day D?"
//!
//! Today is computed live from stock levels. Past days read the most recent
//! snapshot batch taken on or before D; persisted figures are summed as stored,
//! never recomputed from current prices.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use stockledger_core::{Clock, DomainError, DomainResult, ProductId, StoreId, TenantId};
use stockledger_inventory::{ProductDescriptor, ValuationFigures, round_money};

use super::store::{SnapshotStore, SnapshotStoreError};
use crate::catalog::{CatalogError, ProductCatalog};
use crate::store::{LedgerStore, LedgerStoreError};

#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to read stock levels: {0}")]
    Ledger(#[from] LedgerStoreError),

    #[error("failed to read snapshots: {0}")]
    Snapshots(#[from] SnapshotStoreError),

    #[error("failed to read product catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to value stock: {0}")]
    Figures(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationQuery {
    pub as_of: NaiveDate,
    /// `None` means every store of the tenant.
    pub stores: Option<Vec<StoreId>>,
}

impl ValuationQuery {
    pub fn on(as_of: NaiveDate) -> Self {
        Self { as_of, stores: None }
    }

    pub fn for_stores(mut self, stores: impl IntoIterator<Item = StoreId>) -> Self {
        self.stores = Some(stores.into_iter().collect());
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationSource {
    Live,
    Snapshot,
}

/// Monetary figures rounded to 2 dp and rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationAmounts {
    pub inventory_value: String,
    pub retail_value: String,
    pub potential_profit: String,
    pub margin: String,
}

impl From<&ValuationFigures> for ValuationAmounts {
    fn from(figures: &ValuationFigures) -> Self {
        Self {
            inventory_value: render(figures.inventory_value),
            retail_value: render(figures.retail_value),
            potential_profit: render(figures.potential_profit),
            margin: render(figures.margin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductValuation {
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub category_name: Option<String>,
    pub units: String,
    #[serde(flatten)]
    pub amounts: ValuationAmounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub as_of: NaiveDate,
    pub source: ValuationSource,
    /// Day of the snapshot batch used for a historical answer.
    pub snapshot_as_of: Option<NaiveDate>,
    pub totals: ValuationAmounts,
    pub products: Vec<ProductValuation>,
}

fn render(value: Decimal) -> String {
    let rounded = round_money(value);
    // Avoid "-0.00".
    let rounded = if rounded.is_zero() { Decimal::ZERO } else { rounded };
    format!("{rounded:.2}")
}

/// Per-product accumulator across stores.
#[derive(Debug, Default)]
struct ProductTotals {
    descriptor: ProductDescriptor,
    units: Decimal,
    figures: ValuationFigures,
}

#[derive(Debug, Default)]
struct Aggregate {
    products: HashMap<ProductId, ProductTotals>,
}

impl Aggregate {
    fn add(
        &mut self,
        product_id: ProductId,
        descriptor: &ProductDescriptor,
        units: Decimal,
        figures: &ValuationFigures,
    ) -> DomainResult<()> {
        let totals = self.products.entry(product_id).or_insert_with(|| ProductTotals {
            descriptor: descriptor.clone(),
            ..Default::default()
        });
        totals.units = totals
            .units
            .checked_add(units)
            .ok_or_else(|| DomainError::validation("total units are out of range"))?;
        totals.figures = totals.figures.combine(figures)?;
        Ok(())
    }

    fn into_report(
        self,
        as_of: NaiveDate,
        source: ValuationSource,
        snapshot_as_of: Option<NaiveDate>,
    ) -> DomainResult<ValuationReport> {
        let mut grand = ValuationFigures::default();
        let mut sorted: BTreeMap<(String, ProductId), ProductTotals> = BTreeMap::new();
        for (product_id, totals) in self.products {
            grand = grand.combine(&totals.figures)?;
            sorted.insert((totals.descriptor.name.clone(), product_id), totals);
        }

        let products = sorted
            .into_iter()
            .map(|((_, product_id), totals)| ProductValuation {
                product_id,
                product_name: totals.descriptor.name,
                sku: totals.descriptor.sku,
                barcode: totals.descriptor.barcode,
                category_name: totals.descriptor.category_name,
                units: render(totals.units),
                amounts: ValuationAmounts::from(&totals.figures),
            })
            .collect();

        Ok(ValuationReport {
            as_of,
            source,
            snapshot_as_of,
            totals: ValuationAmounts::from(&grand),
            products,
        })
    }
}

pub struct ValuationQueryService<L, S, C> {
    ledger: L,
    snapshots: S,
    catalog: C,
    clock: Arc<dyn Clock>,
}

impl<L, S, C> ValuationQueryService<L, S, C>
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
        }
    }

    #[instrument(skip(self, query), fields(tenant_id = %tenant_id.as_uuid(), as_of = %query.as_of), err)]
    pub async fn valuation(
        &self,
        tenant_id: TenantId,
        query: &ValuationQuery,
    ) -> Result<ValuationReport, ValuationError> {
        let today = self.clock.today();
        if query.as_of > today {
            return Err(ValuationError::Validation(format!(
                "valuation date {} is after today ({today})",
                query.as_of
            )));
        }

        let stores = query.stores.as_deref();
        if query.as_of == today {
            self.live(tenant_id, query.as_of, stores).await
        } else {
            self.historical(tenant_id, query.as_of, stores).await
        }
    }

    /// Current valuation straight from stock levels, reported as of `as_of`.
    pub async fn live(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<ValuationReport, ValuationError> {
        let levels = self.ledger.list_stock_levels(tenant_id, stores).await?;

        let mut product_ids: Vec<ProductId> = levels.iter().map(|l| l.product_id).collect();
        product_ids.sort();
        product_ids.dedup();
        let descriptors = self.catalog.describe(tenant_id, &product_ids).await?;

        let empty = ProductDescriptor::default();
        let mut aggregate = Aggregate::default();
        for level in &levels {
            let figures = ValuationFigures::compute(level.units, level.cost, level.price)?;
            let descriptor = descriptors.get(&level.product_id).unwrap_or(&empty);
            aggregate.add(level.product_id, descriptor, level.units, &figures)?;
        }

        debug!(rows = levels.len(), "live valuation computed");
        Ok(aggregate.into_report(as_of, ValuationSource::Live, None)?)
    }

    /// Valuation replayed from the latest snapshot batch on or before `as_of`.
    pub async fn historical(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        stores: Option<&[StoreId]>,
    ) -> Result<ValuationReport, ValuationError> {
        let batch = self
            .snapshots
            .load_batch_on_or_before(tenant_id, as_of, stores)
            .await?;

        let mut aggregate = Aggregate::default();
        let snapshot_as_of = batch.as_ref().map(|b| b.as_of);
        if let Some(batch) = &batch {
            for line in batch.snapshots.iter().flat_map(|s| s.lines.iter()) {
                aggregate.add(line.product_id, &line.product, line.units, &line.figures)?;
            }
        }

        debug!(?snapshot_as_of, "historical valuation replayed");
        Ok(aggregate.into_report(as_of, ValuationSource::Snapshot, snapshot_as_of)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockledger_inventory::{StockKey, StockLevel, StockSettings};

    use crate::catalog::InMemoryProductCatalog;
    use crate::store::InMemoryLedgerStore;
    use crate::valuation::store::InMemorySnapshotStore;

    fn figures(units: Decimal, cost: Decimal, price: Decimal) -> ValuationFigures {
        ValuationFigures::compute(units, cost, price).unwrap()
    }

    /// Moves forward by `step` after every read.
    struct SteppingClock {
        now: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut now = self.now.lock().unwrap();
            let current = *now;
            *now += self.step;
            current
        }
    }

    type Service = ValuationQueryService<Arc<InMemoryLedgerStore>, Arc<InMemorySnapshotStore>, Arc<InMemoryProductCatalog>>;

    async fn service_with_row(clock: Arc<dyn Clock>, tenant_id: TenantId, units: Decimal) -> Service {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let settings = StockSettings {
            price: dec!(2),
            cost: dec!(1),
            minimum_stock_level: dec!(0),
            is_sellable: true,
        };
        ledger
            .link_product(StockLevel::linked(
                tenant_id,
                StockKey::new(StoreId::new(), ProductId::new()),
                settings,
                units,
            ))
            .await
            .unwrap();
        ValuationQueryService::new(
            ledger,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryProductCatalog::new()),
            clock,
        )
    }

    #[test]
    fn amounts_render_with_two_decimals() {
        let amounts = ValuationAmounts::from(&figures(dec!(3), dec!(0.335), dec!(1)));

        assert_eq!(amounts.inventory_value, "1.01");
        assert_eq!(amounts.retail_value, "3.00");
        assert_eq!(amounts.potential_profit, "2.00");
        assert_eq!(amounts.margin, "66.50");
    }

    #[test]
    fn zero_retail_renders_zero_margin() {
        let amounts = ValuationAmounts::from(&figures(dec!(0), dec!(10), dec!(20)));
        assert_eq!(amounts.margin, "0.00");
        assert_eq!(render(dec!(-0.001)), "0.00");
    }

    #[test]
    fn products_aggregate_across_stores_and_sort_by_name() {
        let mut aggregate = Aggregate::default();
        let (apple, banana) = (ProductId::new(), ProductId::new());
        let named = |name: &str| ProductDescriptor {
            name: name.to_string(),
            ..Default::default()
        };

        aggregate.add(banana, &named("Banana"), dec!(2), &figures(dec!(2), dec!(1), dec!(2))).unwrap();
        aggregate.add(apple, &named("Apple"), dec!(1), &figures(dec!(1), dec!(5), dec!(10))).unwrap();
        aggregate.add(apple, &named("Apple"), dec!(3), &figures(dec!(3), dec!(5), dec!(10))).unwrap();

        let report = aggregate
            .into_report(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), ValuationSource::Snapshot, None)
            .unwrap();

        assert_eq!(report.products.len(), 2);
        assert_eq!(report.products[0].product_name, "Apple");
        assert_eq!(report.products[0].units, "4.00");
        assert_eq!(report.products[0].amounts.inventory_value, "20.00");
        assert_eq!(report.totals.inventory_value, "22.00");
        assert_eq!(report.totals.retail_value, "44.00");
        assert_eq!(report.totals.margin, "50.00");
    }

    #[test]
    fn product_amounts_serialize_flat() {
        let mut aggregate = Aggregate::default();
        let descriptor = ProductDescriptor {
            name: "Cocoa".to_string(),
            sku: Some("CC-1".to_string()),
            ..Default::default()
        };
        aggregate.add(ProductId::new(), &descriptor, dec!(2), &figures(dec!(2), dec!(3), dec!(5))).unwrap();
        let report = aggregate
            .into_report(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), ValuationSource::Live, None)
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["source"], "live");
        assert_eq!(json["totals"]["inventory_value"], "6.00");
        assert_eq!(json["products"][0]["sku"], "CC-1");
        assert_eq!(json["products"][0]["retail_value"], "10.00");
        assert!(json["products"][0].get("amounts").is_none());
    }

    #[tokio::test]
    async fn live_report_keeps_the_requested_day_across_midnight() {
        let clock = Arc::new(SteppingClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 59).unwrap()),
            step: Duration::minutes(1),
        });
        let tenant_id = TenantId::new();
        let service = service_with_row(clock, tenant_id, dec!(3)).await;
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        let report = service.valuation(tenant_id, &ValuationQuery::on(day)).await.unwrap();

        assert_eq!(report.source, ValuationSource::Live);
        assert_eq!(report.as_of, day);
        assert_eq!(report.totals.inventory_value, "3.00");
    }

    #[tokio::test]
    async fn out_of_range_stock_is_an_error_not_a_panic() {
        let clock = Arc::new(stockledger_core::FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let tenant_id = TenantId::new();
        let service = service_with_row(clock, tenant_id, Decimal::MAX).await;
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        let err = service.valuation(tenant_id, &ValuationQuery::on(day)).await.unwrap_err();

        assert!(matches!(err, ValuationError::Figures(DomainError::Validation(_))));
    }
}
