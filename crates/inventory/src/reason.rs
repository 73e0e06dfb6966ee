//! Why a stock level moved.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;

use crate::source::DocumentKind;

/// Closed set of reason codes recorded on every history entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Sale,
    Refund,
    Receive,
    Loss,
    Damage,
    Expiry,
    Adjustment,
    TransferIn,
    TransferOut,
    Transform,
    Count,
}

impl Reason {
    pub const ALL: [Reason; 11] = [
        Reason::Sale,
        Reason::Refund,
        Reason::Receive,
        Reason::Loss,
        Reason::Damage,
        Reason::Expiry,
        Reason::Adjustment,
        Reason::TransferIn,
        Reason::TransferOut,
        Reason::Transform,
        Reason::Count,
    ];

    /// Stable storage code.
    pub fn code(self) -> &'static str {
        match self {
            Reason::Sale => "SALE",
            Reason::Refund => "REFUND",
            Reason::Receive => "RECEIVE",
            Reason::Loss => "LOSS",
            Reason::Damage => "DAMAGE",
            Reason::Expiry => "EXPIRY",
            Reason::Adjustment => "ADJUSTMENT",
            Reason::TransferIn => "TRANSFER_IN",
            Reason::TransferOut => "TRANSFER_OUT",
            Reason::Transform => "TRANSFORM",
            Reason::Count => "COUNT",
        }
    }

    /// Direction implied by the reason, if it only ever moves stock one way.
    ///
    /// Adjustments, transforms and counts can go either way.
    pub fn fixed_direction(self) -> Option<Direction> {
        match self {
            Reason::Sale
            | Reason::Loss
            | Reason::Damage
            | Reason::Expiry
            | Reason::TransferOut => Some(Direction::Subtract),
            Reason::Refund | Reason::Receive | Reason::TransferIn => Some(Direction::Add),
            Reason::Adjustment | Reason::Transform | Reason::Count => None,
        }
    }

    /// Whether a document of `kind` may originate a change with this reason.
    pub fn accepts(self, kind: DocumentKind) -> bool {
        match self {
            Reason::Sale | Reason::Refund => kind == DocumentKind::Receipt,
            Reason::Receive => matches!(
                kind,
                DocumentKind::PurchaseOrder | DocumentKind::StockAdjustment
            ),
            Reason::Loss | Reason::Damage | Reason::Expiry | Reason::Adjustment => {
                kind == DocumentKind::StockAdjustment
            }
            Reason::TransferIn | Reason::TransferOut => kind == DocumentKind::TransferOrder,
            Reason::Transform => kind == DocumentKind::ProductTransform,
            Reason::Count => kind == DocumentKind::InventoryCount,
        }
    }
}

impl core::fmt::Display for Reason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Reason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reason::ALL
            .into_iter()
            .find(|r| r.code() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown reason code: {s}")))
    }
}

/// Whether a non-negative delta increases or decreases stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Add,
    Subtract,
}

impl Direction {
    /// Signed adjustment for a non-negative magnitude.
    pub fn signed(self, magnitude: Decimal) -> Decimal {
        match self {
            Direction::Add => magnitude,
            Direction::Subtract => -magnitude,
        }
    }
}
