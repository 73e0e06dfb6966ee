//! Valuation snapshots and the live/historical valuation query.

pub mod builder;
pub mod postgres;
pub mod query;
pub mod store;

pub use builder::{SnapshotBuilder, SnapshotError, SnapshotRun};
pub use postgres::PostgresSnapshotStore;
pub use query::{
    ProductValuation, ValuationAmounts, ValuationError, ValuationQuery, ValuationQueryService,
    ValuationReport, ValuationSource,
};
pub use store::{InMemorySnapshotStore, SnapshotBatch, SnapshotStore, SnapshotStoreError, StoreSnapshot};
