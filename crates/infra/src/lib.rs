//! Infrastructure layer: stock ledger persistence, the ledger writer, history
//! queries, valuation snapshots and their scheduler, configuration.

pub mod catalog;
pub mod config;
pub mod error;
pub mod history;
pub mod ledger_writer;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod valuation;

pub use catalog::{CatalogError, InMemoryProductCatalog, PostgresProductCatalog, ProductCatalog};
pub use crate::config::LedgerConfig;
pub use error::LedgerError;
pub use history::HistoryLedger;
pub use ledger_writer::{ChangeOutcome, LedgerWriter, StockChangeReceipt, StockChangedEnvelope};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use scheduler::{PassReport, SchedulerConfig, SnapshotScheduler, SnapshotSchedulerHandle};
pub use store::{InMemoryLedgerStore, LedgerStore, LedgerStoreError, PostgresLedgerStore};
