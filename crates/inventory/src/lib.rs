//! Inventory ledger domain.
//!
//! Business rules for stock mutation, audit history and valuation, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod change;
pub mod history;
pub mod reason;
pub mod source;
pub mod stock_level;
pub mod valuation;

pub use change::{StockChange, StockMovement};
pub use history::{HistoryEntry, HistoryEntryId, StockChanged};
pub use reason::{Direction, Reason};
pub use source::{
    AdjustmentLineNo, AdjustmentNo, ChangeSource, CountLineNo, CountNo, DocumentKind,
    DocumentRef, IdempotencyKey, PurchaseLineNo, PurchaseOrderNo, ReceiptLineNo, ReceiptNo,
    TransferLineNo, TransferNo, TransformLineNo, TransformNo,
};
pub use stock_level::{StockKey, StockLevel, StockSettings};
pub use valuation::{
    ProductDescriptor, SnapshotId, ValuationFigures, ValuationSnapshot, ValuationSnapshotLine,
    round_money,
};
