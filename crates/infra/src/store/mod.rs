//! Persistence boundary for stock levels and the history ledger.
//!
//! Stock rows and history entries live behind one store so a change to a row
//! and the audit entry describing it are committed in a single unit.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{CommitOutcome, LedgerStore, LedgerStoreError, StockCommit};
