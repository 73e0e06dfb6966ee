//! Current stock for one (store, product) pair.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId, StoreId, TenantId};

use crate::change::{StockChange, StockMovement};

/// Key of a stock level row inside a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub store_id: StoreId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(store_id: StoreId, product_id: ProductId) -> Self {
        Self {
            store_id,
            product_id,
        }
    }
}

/// Pricing and replenishment attributes of a stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    pub price: Decimal,
    /// Denormalized from the product's cost.
    pub cost: Decimal,
    pub minimum_stock_level: Decimal,
    pub is_sellable: bool,
}

impl StockSettings {
    pub fn validate(&self) -> DomainResult<()> {
        if self.price < Decimal::ZERO {
            return Err(DomainError::validation("price cannot be negative"));
        }
        if self.cost < Decimal::ZERO {
            return Err(DomainError::validation("cost cannot be negative"));
        }
        Ok(())
    }
}

/// The mutable stock row. Units may go negative (oversell).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub units: Decimal,
    pub price: Decimal,
    pub cost: Decimal,
    pub minimum_stock_level: Decimal,
    pub is_sellable: bool,
    /// Bumped on every committed unit change.
    pub version: u64,
}

impl StockLevel {
    /// Row created when a product is linked to a store.
    pub fn linked(
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
        opening_units: Decimal,
    ) -> Self {
        Self {
            tenant_id,
            store_id: key.store_id,
            product_id: key.product_id,
            units: opening_units,
            price: settings.price,
            cost: settings.cost,
            minimum_stock_level: settings.minimum_stock_level,
            is_sellable: settings.is_sellable,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.store_id, self.product_id)
    }

    pub fn settings(&self) -> StockSettings {
        StockSettings {
            price: self.price,
            cost: self.cost,
            minimum_stock_level: self.minimum_stock_level,
            is_sellable: self.is_sellable,
        }
    }

    /// Decide the movement a change produces against this row (no mutation).
    pub fn plan(&self, change: &StockChange) -> DomainResult<StockMovement> {
        change.validate()?;
        if change.store_id != self.store_id || change.product_id != self.product_id {
            return Err(DomainError::invariant("change targets a different stock level"));
        }

        let adjustment = change.adjustment();
        let stock_after = self
            .units
            .checked_add(adjustment)
            .ok_or_else(|| DomainError::validation("resulting stock is out of range"))?;
        Ok(StockMovement {
            adjustment,
            stock_before: self.units,
            stock_after,
            based_on_version: self.version,
        })
    }

    /// Evolve the row from a committed movement.
    pub fn apply(&mut self, movement: &StockMovement) {
        self.units = movement.stock_after;
        self.version += 1;
    }

    pub fn apply_settings(&mut self, settings: &StockSettings) {
        self.price = settings.price;
        self.cost = settings.cost;
        self.minimum_stock_level = settings.minimum_stock_level;
        self.is_sellable = settings.is_sellable;
    }

    pub fn is_below_minimum(&self) -> bool {
        self.units <= self.minimum_stock_level
    }
}
