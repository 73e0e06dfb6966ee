//! Runs the daily valuation snapshot scheduler against Postgres.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use stockledger_core::SystemClock;
use stockledger_infra::valuation::{PostgresSnapshotStore, SnapshotBuilder};
use stockledger_infra::{LedgerConfig, PostgresLedgerStore, PostgresProductCatalog, SchedulerConfig, SnapshotScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    stockledger_observability::init();

    let config = LedgerConfig::load().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;
    info!("database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let builder = SnapshotBuilder::new(
        PostgresLedgerStore::new(pool.clone()),
        PostgresSnapshotStore::new(pool.clone()),
        PostgresProductCatalog::new(pool),
        Arc::new(SystemClock),
    );
    let scheduler_config = SchedulerConfig::from(&config.snapshot);
    info!(
        run_hour_utc = scheduler_config.run_hour_utc,
        poll_interval_secs = scheduler_config.poll_interval.as_secs(),
        "starting snapshot scheduler"
    );
    let handle = SnapshotScheduler::new(Arc::new(builder), scheduler_config).spawn();

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    handle.shutdown().await;

    Ok(())
}
