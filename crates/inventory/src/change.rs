//! A requested stock mutation and its planned outcome.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ProductId, StoreId, UserId};

use crate::reason::{Direction, Reason};
use crate::source::{ChangeSource, IdempotencyKey};

/// Command: apply a stock change to one (store, product) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub reason: Reason,
    pub source: ChangeSource,
    /// Human-readable document name (e.g. the POS receipt number). Falls back
    /// to a label derived from `source`.
    pub source_name: Option<String>,
    /// Non-negative magnitude.
    pub delta: Decimal,
    pub direction: Direction,
}

impl StockChange {
    pub fn validate(&self) -> DomainResult<()> {
        if self.delta < Decimal::ZERO {
            return Err(DomainError::validation("delta must be a non-negative magnitude"));
        }

        if !self.reason.accepts(self.source.kind()) {
            return Err(DomainError::validation(format!(
                "reason {} cannot originate from a {} document",
                self.reason,
                self.source.kind()
            )));
        }

        if let Some(expected) = self.reason.fixed_direction() {
            if expected != self.direction {
                return Err(DomainError::validation(format!(
                    "reason {} requires direction {:?}",
                    self.reason, expected
                )));
            }
        }

        Ok(())
    }

    /// Signed delta applied to the stock level.
    pub fn adjustment(&self) -> Decimal {
        self.direction.signed(self.delta)
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.source, self.store_id, self.product_id)
    }

    pub fn change_source_name(&self) -> String {
        match &self.source_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self.source.document().label(),
        }
    }
}

/// Outcome of planning a change against a loaded stock level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub adjustment: Decimal,
    pub stock_before: Decimal,
    pub stock_after: Decimal,
    /// Row version the plan was computed against.
    pub based_on_version: u64,
}
