//! Originating business documents and the idempotency key derived from them.
//!
//! Every ledger mutation names the document line that caused it. Each document
//! type has its own registration-number types so a purchase-order line can
//! never be passed where a receipt line is expected.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ProductId, StoreId};

macro_rules! reg_no {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub i64);

        impl $t {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

reg_no!(
    /// Receipt registration number (local or from the remote POS system).
    ReceiptNo
);
reg_no!(ReceiptLineNo);
reg_no!(AdjustmentNo);
reg_no!(AdjustmentLineNo);
reg_no!(TransferNo);
reg_no!(TransferLineNo);
reg_no!(PurchaseOrderNo);
reg_no!(PurchaseLineNo);
reg_no!(TransformNo);
reg_no!(TransformLineNo);
reg_no!(CountNo);
reg_no!(CountLineNo);

/// Type of the originating document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Receipt,
    StockAdjustment,
    TransferOrder,
    PurchaseOrder,
    ProductTransform,
    InventoryCount,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Receipt,
        DocumentKind::StockAdjustment,
        DocumentKind::TransferOrder,
        DocumentKind::PurchaseOrder,
        DocumentKind::ProductTransform,
        DocumentKind::InventoryCount,
    ];

    pub fn code(self) -> &'static str {
        match self {
            DocumentKind::Receipt => "receipt",
            DocumentKind::StockAdjustment => "stock_adjustment",
            DocumentKind::TransferOrder => "transfer_order",
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::ProductTransform => "product_transform",
            DocumentKind::InventoryCount => "inventory_count",
        }
    }

    fn label(self) -> &'static str {
        match self {
            DocumentKind::Receipt => "Receipt",
            DocumentKind::StockAdjustment => "Stock adjustment",
            DocumentKind::TransferOrder => "Transfer order",
            DocumentKind::PurchaseOrder => "Purchase order",
            DocumentKind::ProductTransform => "Product transform",
            DocumentKind::InventoryCount => "Inventory count",
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentKind::ALL
            .into_iter()
            .find(|k| k.code() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown document kind: {s}")))
    }
}

/// A whole business document (receipt #100, transfer order #7, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub reg_no: i64,
}

impl DocumentRef {
    pub fn new(kind: DocumentKind, reg_no: i64) -> Self {
        Self { kind, reg_no }
    }

    pub fn label(&self) -> String {
        format!("{} #{}", self.kind.label(), self.reg_no)
    }
}

/// The document line a stock change originates from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeSource {
    Receipt {
        receipt: ReceiptNo,
        line: ReceiptLineNo,
    },
    StockAdjustment {
        adjustment: AdjustmentNo,
        line: AdjustmentLineNo,
    },
    TransferOrder {
        transfer: TransferNo,
        line: TransferLineNo,
    },
    PurchaseOrder {
        order: PurchaseOrderNo,
        line: PurchaseLineNo,
    },
    ProductTransform {
        transform: TransformNo,
        line: TransformLineNo,
    },
    InventoryCount {
        count: CountNo,
        line: CountLineNo,
    },
}

impl ChangeSource {
    pub fn receipt_line(receipt: i64, line: i64) -> Self {
        Self::Receipt {
            receipt: ReceiptNo(receipt),
            line: ReceiptLineNo(line),
        }
    }

    pub fn adjustment_line(adjustment: i64, line: i64) -> Self {
        Self::StockAdjustment {
            adjustment: AdjustmentNo(adjustment),
            line: AdjustmentLineNo(line),
        }
    }

    pub fn transfer_line(transfer: i64, line: i64) -> Self {
        Self::TransferOrder {
            transfer: TransferNo(transfer),
            line: TransferLineNo(line),
        }
    }

    pub fn purchase_line(order: i64, line: i64) -> Self {
        Self::PurchaseOrder {
            order: PurchaseOrderNo(order),
            line: PurchaseLineNo(line),
        }
    }

    pub fn transform_line(transform: i64, line: i64) -> Self {
        Self::ProductTransform {
            transform: TransformNo(transform),
            line: TransformLineNo(line),
        }
    }

    pub fn count_line(count: i64, line: i64) -> Self {
        Self::InventoryCount {
            count: CountNo(count),
            line: CountLineNo(line),
        }
    }

    /// Rebuild a source from its stored columns.
    pub fn from_parts(kind: DocumentKind, reg_no: i64, line_reg_no: i64) -> Self {
        match kind {
            DocumentKind::Receipt => Self::receipt_line(reg_no, line_reg_no),
            DocumentKind::StockAdjustment => Self::adjustment_line(reg_no, line_reg_no),
            DocumentKind::TransferOrder => Self::transfer_line(reg_no, line_reg_no),
            DocumentKind::PurchaseOrder => Self::purchase_line(reg_no, line_reg_no),
            DocumentKind::ProductTransform => Self::transform_line(reg_no, line_reg_no),
            DocumentKind::InventoryCount => Self::count_line(reg_no, line_reg_no),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            ChangeSource::Receipt { .. } => DocumentKind::Receipt,
            ChangeSource::StockAdjustment { .. } => DocumentKind::StockAdjustment,
            ChangeSource::TransferOrder { .. } => DocumentKind::TransferOrder,
            ChangeSource::PurchaseOrder { .. } => DocumentKind::PurchaseOrder,
            ChangeSource::ProductTransform { .. } => DocumentKind::ProductTransform,
            ChangeSource::InventoryCount { .. } => DocumentKind::InventoryCount,
        }
    }

    /// Registration number of the originating document.
    pub fn change_source_reg_no(&self) -> i64 {
        match self {
            ChangeSource::Receipt { receipt, .. } => receipt.get(),
            ChangeSource::StockAdjustment { adjustment, .. } => adjustment.get(),
            ChangeSource::TransferOrder { transfer, .. } => transfer.get(),
            ChangeSource::PurchaseOrder { order, .. } => order.get(),
            ChangeSource::ProductTransform { transform, .. } => transform.get(),
            ChangeSource::InventoryCount { count, .. } => count.get(),
        }
    }

    /// Registration number of the originating line within the document.
    pub fn line_source_reg_no(&self) -> i64 {
        match self {
            ChangeSource::Receipt { line, .. } => line.get(),
            ChangeSource::StockAdjustment { line, .. } => line.get(),
            ChangeSource::TransferOrder { line, .. } => line.get(),
            ChangeSource::PurchaseOrder { line, .. } => line.get(),
            ChangeSource::ProductTransform { line, .. } => line.get(),
            ChangeSource::InventoryCount { line, .. } => line.get(),
        }
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.kind(), self.change_source_reg_no())
    }
}

/// Identifies one logical stock event exactly once.
///
/// Store is part of the key: both legs of a transfer line share the document
/// and line numbers but move stock in different stores.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub document: DocumentRef,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub line_reg_no: i64,
}

impl IdempotencyKey {
    pub fn new(source: &ChangeSource, store_id: StoreId, product_id: ProductId) -> Self {
        Self {
            document: source.document(),
            store_id,
            product_id,
            line_reg_no: source.line_source_reg_no(),
        }
    }
}
