//! Stock valuation math and frozen snapshot records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{DomainError, DomainResult, ProductId, StoreId, TenantId};

use crate::stock_level::StockLevel;

/// Round a monetary/derived value to 2 decimal places (half away from zero).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Derived value fields of a stock position.
///
/// - `inventory_value = units * cost`
/// - `retail_value = units * price`
/// - `potential_profit = retail_value - inventory_value`
/// - `margin = potential_profit * 100 / retail_value`, 0 when `retail_value` is 0
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValuationFigures {
    pub inventory_value: Decimal,
    pub retail_value: Decimal,
    pub potential_profit: Decimal,
    pub margin: Decimal,
}

impl ValuationFigures {
    pub fn compute(units: Decimal, cost: Decimal, price: Decimal) -> DomainResult<Self> {
        let inventory_value = units
            .checked_mul(cost)
            .ok_or_else(|| overflow("inventory value"))?;
        let retail_value = units
            .checked_mul(price)
            .ok_or_else(|| overflow("retail value"))?;
        Self::from_values(inventory_value, retail_value)
    }

    /// Derive profit and margin from already summed values.
    pub fn from_values(inventory_value: Decimal, retail_value: Decimal) -> DomainResult<Self> {
        let potential_profit = retail_value
            .checked_sub(inventory_value)
            .ok_or_else(|| overflow("potential profit"))?;
        let margin = if retail_value.is_zero() {
            Decimal::ZERO
        } else {
            potential_profit
                .checked_div(retail_value)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .ok_or_else(|| overflow("margin"))?
        };

        Ok(Self {
            inventory_value,
            retail_value,
            potential_profit,
            margin,
        })
    }

    /// Sum two positions. Margin is recomputed from the summed values, never
    /// averaged.
    pub fn combine(&self, other: &ValuationFigures) -> DomainResult<Self> {
        let inventory_value = self
            .inventory_value
            .checked_add(other.inventory_value)
            .ok_or_else(|| overflow("inventory value"))?;
        let retail_value = self
            .retail_value
            .checked_add(other.retail_value)
            .ok_or_else(|| overflow("retail value"))?;
        Self::from_values(inventory_value, retail_value)
    }

    pub fn rounded(&self) -> Self {
        Self {
            inventory_value: round_money(self.inventory_value),
            retail_value: round_money(self.retail_value),
            potential_profit: round_money(self.potential_profit),
            margin: round_money(self.margin),
        }
    }
}

/// Catalog attributes frozen into snapshot lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductDescriptor {
    pub name: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub category_name: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
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

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of one store's valuation snapshot for a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub id: SnapshotId,
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub as_of: NaiveDate,
    pub created_date: DateTime<Utc>,
}

impl ValuationSnapshot {
    pub fn new(tenant_id: TenantId, store_id: StoreId, created_date: DateTime<Utc>) -> Self {
        Self {
            id: SnapshotId::new(),
            tenant_id,
            store_id,
            as_of: created_date.date_naive(),
            created_date,
        }
    }
}

/// Frozen valuation of one product in one store snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSnapshotLine {
    pub snapshot_id: SnapshotId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    #[serde(flatten)]
    pub product: ProductDescriptor,
    pub price: Decimal,
    pub cost: Decimal,
    pub units: Decimal,
    pub is_sellable: bool,
    #[serde(flatten)]
    pub figures: ValuationFigures,
}

impl ValuationSnapshotLine {
    pub fn freeze(
        snapshot: &ValuationSnapshot,
        level: &StockLevel,
        product: ProductDescriptor,
    ) -> DomainResult<Self> {
        Ok(Self {
            snapshot_id: snapshot.id,
            store_id: level.store_id,
            product_id: level.product_id,
            product,
            price: level.price,
            cost: level.cost,
            units: level.units,
            is_sellable: level.is_sellable,
            figures: ValuationFigures::compute(level.units, level.cost, level.price)?,
        })
    }
}

fn overflow(field: &str) -> DomainError {
    DomainError::validation(format!("{field} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reference_line_values() {
        let figures = ValuationFigures::compute(dec!(6), dec!(1000), dec!(2500)).unwrap();
        assert_eq!(figures.inventory_value, dec!(6000));
        assert_eq!(figures.retail_value, dec!(15000));
        assert_eq!(figures.potential_profit, dec!(9000));
        assert_eq!(figures.margin, dec!(60));
    }

    #[test]
    fn zero_retail_value_clamps_margin() {
        let free = ValuationFigures::compute(dec!(4), dec!(3), dec!(0)).unwrap();
        assert_eq!(free.margin, Decimal::ZERO);
        assert_eq!(free.potential_profit, dec!(-12));

        let empty = ValuationFigures::compute(dec!(0), dec!(3), dec!(9)).unwrap();
        assert_eq!(empty, ValuationFigures::default());
    }

    #[test]
    fn combined_margin_is_weighted_by_retail_value() {
        let a = ValuationFigures::compute(dec!(1), dec!(50), dec!(100)).unwrap();
        let b = ValuationFigures::compute(dec!(1), dec!(900), dec!(1000)).unwrap();
        let total = a.combine(&b).unwrap();
        assert_eq!(total.retail_value, dec!(1100));
        assert_eq!(total.potential_profit, dec!(150));
        assert_eq!(total.rounded().margin, dec!(13.64));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = ValuationFigures::compute(Decimal::MAX, dec!(2), dec!(3)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let big = ValuationFigures::from_values(Decimal::ZERO, Decimal::MAX).unwrap();
        assert!(big.combine(&big).is_err());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(-2.345)), dec!(-2.35));
        assert_eq!(format!("{:.2}", round_money(dec!(60))), "60.00");
    }

    proptest! {
        #[test]
        fn value_identity_holds(
            units in -10_000i64..10_000,
            cost_cents in 0i64..1_000_000,
            price_cents in 0i64..1_000_000,
        ) {
            let figures = ValuationFigures::compute(
                Decimal::from(units),
                Decimal::new(cost_cents, 2),
                Decimal::new(price_cents, 2),
            )
            .unwrap();
            prop_assert_eq!(figures.inventory_value + figures.potential_profit, figures.retail_value);
            if figures.retail_value.is_zero() {
                prop_assert_eq!(figures.margin, Decimal::ZERO);
            }
        }
    }
}
