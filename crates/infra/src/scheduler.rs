//! Daily snapshot scheduler.
//!
//! Wakes every poll interval; once the configured UTC hour has passed it runs
//! the snapshot builder for every tenant in parallel. A day counts as done only
//! when every tenant succeeded, so failed tenants are picked up again on the
//! next poll (finished tenants answer `AlreadyTaken`).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Timelike};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use stockledger_core::TenantId;

use crate::catalog::ProductCatalog;
use crate::config::SnapshotConfig;
use crate::retry::RetryPolicy;
use crate::store::LedgerStore;
use crate::valuation::builder::{SnapshotBuilder, SnapshotError, SnapshotRun};
use crate::valuation::store::SnapshotStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub run_hour_utc: u32,
    pub poll_interval: Duration,
    /// Per-tenant retry within one pass.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_hour_utc: 23,
            poll_interval: Duration::from_secs(60),
            retry: RetryPolicy::exponential(3, Duration::from_secs(30), Duration::from_secs(240)),
        }
    }
}

impl From<&SnapshotConfig> for SchedulerConfig {
    fn from(config: &SnapshotConfig) -> Self {
        Self {
            run_hour_utc: config.run_hour_utc,
            poll_interval: config.poll_interval(),
            retry: config.retry_policy(),
        }
    }
}

/// Outcome of one pass over all tenants.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub created: Vec<TenantId>,
    pub already_taken: Vec<TenantId>,
    pub failed: Vec<TenantId>,
}

impl PassReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct SnapshotSchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SnapshotSchedulerHandle {
    /// Request shutdown and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "snapshot scheduler task ended abnormally");
        }
    }
}

pub struct SnapshotScheduler<L, S, C> {
    builder: Arc<SnapshotBuilder<L, S, C>>,
    config: SchedulerConfig,
}

impl<L, S, C> SnapshotScheduler<L, S, C>
where
    L: LedgerStore + 'static,
    S: SnapshotStore + 'static,
    C: ProductCatalog + 'static,
{
    pub fn new(builder: Arc<SnapshotBuilder<L, S, C>>, config: SchedulerConfig) -> Self {
        Self { builder, config }
    }

    /// Run the builder for every tenant now, in parallel.
    pub async fn run_once(&self) -> Result<PassReport, SnapshotError> {
        let tenants = self.builder.tenants().await?;
        // Tenants whose task has not reported back; a panicked task leaves its tenant here.
        let mut pending: BTreeSet<TenantId> = tenants.iter().copied().collect();
        let mut tasks = JoinSet::new();

        for tenant_id in tenants {
            let builder = self.builder.clone();
            let retry = self.config.retry.clone();
            tasks.spawn(async move { (tenant_id, run_with_retry(&builder, tenant_id, &retry).await) });
        }

        let mut report = PassReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (tenant_id, outcome) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!(error = %e, "snapshot task panicked");
                    continue;
                }
            };
            pending.remove(&tenant_id);
            match outcome {
                Ok(SnapshotRun::Created { .. }) => report.created.push(tenant_id),
                Ok(SnapshotRun::AlreadyTaken { .. }) => report.already_taken.push(tenant_id),
                Err(e) => {
                    error!(tenant = %tenant_id, error = %e, "snapshot pass failed for tenant");
                    report.failed.push(tenant_id);
                }
            }
        }
        for tenant_id in pending {
            error!(tenant = %tenant_id, "snapshot task for tenant did not finish");
            report.failed.push(tenant_id);
        }

        info!(
            created = report.created.len(),
            already_taken = report.already_taken.len(),
            failed = report.failed.len(),
            "snapshot pass finished"
        );
        Ok(report)
    }

    pub fn spawn(self) -> SnapshotSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run_loop(shutdown_rx));
        SnapshotSchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        info!(run_hour_utc = self.config.run_hour_utc, "snapshot scheduler started");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut completed: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let now = self.builder.clock().now();
                    let today = now.date_naive();
                    if now.hour() < self.config.run_hour_utc || completed == Some(today) {
                        continue;
                    }

                    match self.run_once().await {
                        Ok(report) if report.is_complete() => completed = Some(today),
                        Ok(report) => {
                            warn!(failed = report.failed.len(), "snapshot pass incomplete, retrying next poll");
                        }
                        Err(e) => warn!(error = %e, "failed to list tenants for snapshot pass"),
                    }
                }
            }
        }

        info!("snapshot scheduler stopped");
    }
}

async fn run_with_retry<L, S, C>(
    builder: &SnapshotBuilder<L, S, C>,
    tenant_id: TenantId,
    retry: &RetryPolicy,
) -> Result<SnapshotRun, SnapshotError>
where
    L: LedgerStore,
    S: SnapshotStore,
    C: ProductCatalog,
{
    let mut attempt: u32 = 1;
    loop {
        match builder.run(tenant_id).await {
            Ok(run) => return Ok(run),
            Err(e) if retry.should_retry(attempt) => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    tenant = %tenant_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "snapshot run failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockledger_core::{FixedClock, ProductId, StoreId};
    use stockledger_inventory::{ProductDescriptor, StockKey, StockLevel, StockSettings};

    use crate::catalog::{CatalogError, InMemoryProductCatalog};
    use crate::store::InMemoryLedgerStore;
    use crate::valuation::store::InMemorySnapshotStore;

    fn settings() -> StockSettings {
        StockSettings {
            price: dec!(10),
            cost: dec!(4),
            minimum_stock_level: dec!(0),
            is_sellable: true,
        }
    }

    async fn seed(ledger: &InMemoryLedgerStore, tenants: usize) -> Vec<TenantId> {
        let mut ids = Vec::new();
        for _ in 0..tenants {
            let tenant_id = TenantId::new();
            let key = StockKey::new(StoreId::new(), ProductId::new());
            ledger
                .link_product(StockLevel::linked(tenant_id, key, settings(), dec!(2)))
                .await
                .unwrap();
            ids.push(tenant_id);
        }
        ids
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            run_hour_utc: 22,
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn run_once_snapshots_every_tenant() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let tenants = seed(&ledger, 5).await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()));
        let builder = Arc::new(SnapshotBuilder::new(
            ledger,
            snapshots.clone(),
            Arc::new(InMemoryProductCatalog::new()),
            clock,
        ));
        let scheduler = SnapshotScheduler::new(builder, fast_config());

        let first = scheduler.run_once().await.unwrap();
        assert_eq!(first.created.len(), 5);
        assert!(first.is_complete());

        let second = scheduler.run_once().await.unwrap();
        assert_eq!(second.already_taken.len(), 5);

        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        for tenant_id in tenants {
            assert!(snapshots.has_batch(tenant_id, day).await.unwrap());
        }
    }

    /// Catalog that fails the first `failures` calls.
    struct FlakyCatalog {
        remaining: AtomicU32,
        inner: InMemoryProductCatalog,
    }

    #[async_trait::async_trait]
    impl ProductCatalog for FlakyCatalog {
        async fn describe(
            &self,
            tenant_id: TenantId,
            products: &[ProductId],
        ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CatalogError::Unavailable("connection reset".to_string()));
            }
            self.inner.describe(tenant_id, products).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_a_pass() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        seed(&ledger, 1).await;
        let catalog = Arc::new(FlakyCatalog {
            remaining: AtomicU32::new(2),
            inner: InMemoryProductCatalog::new(),
        });
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()));
        let builder = Arc::new(SnapshotBuilder::new(
            ledger,
            Arc::new(InMemorySnapshotStore::new()),
            catalog,
            clock,
        ));

        let report = SnapshotScheduler::new(builder, fast_config()).run_once().await.unwrap();

        assert_eq!(report.created.len(), 1);
        assert!(report.failed.is_empty());
    }

    /// Catalog that panics when asked about one tenant.
    struct PanickingCatalog {
        poisoned: TenantId,
        inner: InMemoryProductCatalog,
    }

    #[async_trait::async_trait]
    impl ProductCatalog for PanickingCatalog {
        async fn describe(
            &self,
            tenant_id: TenantId,
            products: &[ProductId],
        ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError> {
            if tenant_id == self.poisoned {
                panic!("catalog lookup blew up");
            }
            self.inner.describe(tenant_id, products).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicked_tenant_is_reported_failed_and_retried() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let tenants = seed(&ledger, 2).await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()));
        let builder = Arc::new(SnapshotBuilder::new(
            ledger,
            snapshots.clone(),
            PanickingCatalog {
                poisoned: tenants[0],
                inner: InMemoryProductCatalog::new(),
            },
            clock,
        ));

        let report = SnapshotScheduler::new(builder, fast_config()).run_once().await.unwrap();

        assert_eq!(report.failed, vec![tenants[0]]);
        assert_eq!(report.created, vec![tenants[1]]);
        assert!(!report.is_complete());
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(!snapshots.has_batch(tenants[0], day).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_scheduler_waits_for_run_hour_and_stops_on_shutdown() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let tenant_id = seed(&ledger, 1).await[0];
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
        let builder = Arc::new(SnapshotBuilder::new(
            ledger,
            snapshots.clone(),
            Arc::new(InMemoryProductCatalog::new()),
            clock.clone(),
        ));
        let handle = SnapshotScheduler::new(builder, fast_config()).spawn();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!snapshots.has_batch(tenant_id, day).await.unwrap());

        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 22, 30, 0).unwrap());
        let taken = tokio::time::timeout(Duration::from_secs(5), async {
            while !snapshots.has_batch(tenant_id, day).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(taken.is_ok());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
