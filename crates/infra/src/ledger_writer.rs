//! `ApplyStockChange`: the only write path into stock levels and history.
//!
//! Each call reads the stock row, plans the movement, and commits the row
//! update together with one history entry. Version conflicts are retried with
//! backoff; an idempotency key that is already recorded returns the recorded
//! outcome. Events are published only after the commit has succeeded.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, instrument, warn};

use stockledger_core::{Clock, ExpectedVersion, TenantId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{
    HistoryEntry, HistoryEntryId, StockChange, StockChanged, StockKey, StockLevel, StockSettings,
};

use crate::config::WriterConfig;
use crate::error::LedgerError;
use crate::retry::RetryPolicy;
use crate::store::{CommitOutcome, LedgerStore, LedgerStoreError, StockCommit};

pub type StockChangedEnvelope = EventEnvelope<StockChanged>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    Applied,
    /// The idempotency key was already recorded; nothing changed.
    Replayed,
}

/// What a caller gets back from `apply_stock_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChangeReceipt {
    pub new_units: Decimal,
    pub history_entry_id: HistoryEntryId,
    pub outcome: ChangeOutcome,
    /// Units at or below the row's minimum after this change. Always false on replay.
    pub below_minimum: bool,
}

impl StockChangeReceipt {
    fn applied(entry: &HistoryEntry, level: &StockLevel) -> Self {
        Self {
            new_units: entry.stock_after,
            history_entry_id: entry.id,
            outcome: ChangeOutcome::Applied,
            below_minimum: level.is_below_minimum(),
        }
    }

    fn replayed(entry: &HistoryEntry) -> Self {
        Self {
            new_units: entry.stock_after,
            history_entry_id: entry.id,
            outcome: ChangeOutcome::Replayed,
            below_minimum: false,
        }
    }

    pub fn is_replay(&self) -> bool {
        self.outcome == ChangeOutcome::Replayed
    }
}

pub struct LedgerWriter<S, B> {
    store: S,
    bus: B,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<S, B> LedgerWriter<S, B>
where
    S: LedgerStore,
    B: EventBus<StockChangedEnvelope>,
{
    pub fn new(store: S, bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bus,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    /// Writer whose conflict retries follow the `writer` config section.
    pub fn from_config(store: S, bus: B, clock: Arc<dyn Clock>, config: &WriterConfig) -> Self {
        Self::new(store, bus, clock).with_retry_policy(config.retry_policy())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the stock row for a (store, product) link.
    ///
    /// `opening_units` is the starting balance; it is not a ledger movement.
    #[instrument(
        skip(self, settings),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %key.store_id.as_uuid(),
            product_id = %key.product_id.as_uuid()
        ),
        err
    )]
    pub async fn link_product(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
        opening_units: Decimal,
    ) -> Result<StockLevel, LedgerError> {
        settings.validate()?;
        let level = self
            .store
            .link_product(StockLevel::linked(tenant_id, key, settings, opening_units))
            .await?;

        info!(units = %level.units, "product linked to store");
        Ok(level)
    }

    #[instrument(
        skip(self, settings),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %key.store_id.as_uuid(),
            product_id = %key.product_id.as_uuid()
        ),
        err
    )]
    pub async fn update_settings(
        &self,
        tenant_id: TenantId,
        key: StockKey,
        settings: StockSettings,
    ) -> Result<StockLevel, LedgerError> {
        settings.validate()?;
        Ok(self.store.update_settings(tenant_id, key, settings).await?)
    }

    /// Drop the stock row. History and snapshots keep their denormalized copies.
    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %key.store_id.as_uuid(),
            product_id = %key.product_id.as_uuid()
        ),
        err
    )]
    pub async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerError> {
        self.store.unlink_product(tenant_id, key).await?;
        info!("product unlinked from store");
        Ok(())
    }

    #[instrument(
        skip(self, change),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            store_id = %change.store_id.as_uuid(),
            product_id = %change.product_id.as_uuid(),
            reason = %change.reason,
            source = %change.source.document().label(),
            line = change.source.line_source_reg_no(),
            attempts = tracing::field::Empty
        ),
        err
    )]
    pub async fn apply_stock_change(
        &self,
        tenant_id: TenantId,
        change: StockChange,
    ) -> Result<StockChangeReceipt, LedgerError> {
        change.validate()?;

        let idempotency_key = change.idempotency_key();
        if let Some(existing) = self.store.find_entry(tenant_id, &idempotency_key).await? {
            debug!(history_entry_id = %existing.id, "idempotent replay");
            return Ok(StockChangeReceipt::replayed(&existing));
        }

        let key = StockKey::new(change.store_id, change.product_id);
        let mut attempt: u32 = 1;

        loop {
            Span::current().record("attempts", attempt);

            let level = self
                .store
                .load_stock_level(tenant_id, key)
                .await?
                .ok_or_else(|| LedgerError::NotFound("stock level".to_string()))?;

            let movement = level.plan(&change)?;
            let entry = HistoryEntry::record(tenant_id, &change, &movement, self.clock.now());

            let commit = StockCommit {
                expected_version: ExpectedVersion::exact(movement.based_on_version),
                entry,
            };

            match self.store.commit_change(commit).await {
                Ok(CommitOutcome::Applied { entry, level }) => {
                    info!(
                        history_entry_id = %entry.id,
                        adjustment = %entry.adjustment,
                        stock_after = %entry.stock_after,
                        "stock change committed"
                    );
                    let receipt = StockChangeReceipt::applied(&entry, &level);
                    self.publish(tenant_id, &entry, receipt.below_minimum);
                    return Ok(receipt);
                }
                Ok(CommitOutcome::Duplicate(existing)) => {
                    debug!(history_entry_id = %existing.id, "idempotent replay detected at commit");
                    return Ok(StockChangeReceipt::replayed(&existing));
                }
                Err(LedgerStoreError::Concurrency(msg)) => {
                    if !self.retry.should_retry(attempt) {
                        warn!(attempt, error = %msg, "stock level conflict, retries exhausted");
                        return Err(LedgerError::Conflict(format!(
                            "stock level kept changing after {attempt} attempts: {msg}"
                        )));
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "stock level conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn publish(&self, tenant_id: TenantId, entry: &HistoryEntry, below_minimum: bool) {
        let envelope = EventEnvelope::new(
            *entry.id.as_uuid(),
            tenant_id,
            entry.store_id,
            entry.product_id,
            entry.sequence,
            StockChanged::from_entry(entry, below_minimum),
        );

        let event_type = envelope.event_type();
        // Already committed; history stays the source of truth.
        match self.bus.publish(envelope) {
            Ok(()) => debug!(event_type, sequence = entry.sequence, "stock change published"),
            Err(e) => warn!(event_type, history_entry_id = %entry.id, error = ?e, "failed to publish stock change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockledger_core::{FixedClock, ProductId, StoreId, UserId};
    use stockledger_events::{InMemoryBusError, InMemoryEventBus};
    use stockledger_inventory::{ChangeSource, Direction, Reason};

    use crate::history::query::{HistoryFilter, Pagination};
    use crate::store::InMemoryLedgerStore;

    type TestWriter = LedgerWriter<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<StockChangedEnvelope>>>;

    fn writer() -> TestWriter {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        LedgerWriter::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryEventBus::new()),
            clock,
        )
    }

    fn settings(minimum: Decimal) -> StockSettings {
        StockSettings {
            price: dec!(2500),
            cost: dec!(1000),
            minimum_stock_level: minimum,
            is_sellable: true,
        }
    }

    fn change(key: StockKey, reason: Reason, source: ChangeSource, delta: Decimal, direction: Direction) -> StockChange {
        StockChange {
            store_id: key.store_id,
            product_id: key.product_id,
            user_id: UserId::new(),
            reason,
            source,
            source_name: None,
            delta,
            direction,
        }
    }

    #[tokio::test]
    async fn receive_updates_units_and_records_history() {
        let writer = writer();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();

        let receipt = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(1, 1), dec!(10), Direction::Add),
            )
            .await
            .unwrap();

        assert_eq!(receipt.new_units, dec!(10));
        assert_eq!(receipt.outcome, ChangeOutcome::Applied);

        let page = writer
            .store()
            .query_history(tenant_id, &HistoryFilter::for_stock(key.store_id, key.product_id), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id, receipt.history_entry_id);
        assert_eq!(page.entries[0].change_source_name, "Purchase order #1");
    }

    #[tokio::test]
    async fn replay_returns_recorded_result_and_publishes_nothing() {
        let writer = writer();
        let subscription = writer.bus.subscribe();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(6)).await.unwrap();

        let sale = change(key, Reason::Sale, ChangeSource::receipt_line(101, 2), dec!(1), Direction::Subtract);
        let first = writer.apply_stock_change(tenant_id, sale.clone()).await.unwrap();
        let second = writer.apply_stock_change(tenant_id, sale).await.unwrap();

        assert_eq!(first.new_units, dec!(5));
        assert_eq!(second.new_units, dec!(5));
        assert_eq!(second.history_entry_id, first.history_entry_id);
        assert!(second.is_replay());
        assert_eq!(subscription.drain().len(), 1);
    }

    #[tokio::test]
    async fn unknown_stock_row_is_not_found() {
        let writer = writer();
        let key = StockKey::new(StoreId::new(), ProductId::new());

        let err = writer
            .apply_stock_change(
                TenantId::new(),
                change(key, Reason::Receive, ChangeSource::purchase_line(1, 1), dec!(1), Direction::Add),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn incompatible_reason_and_document_is_rejected() {
        let writer = writer();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();

        let err = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Sale, ChangeSource::purchase_line(1, 1), dec!(1), Direction::Subtract),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn low_stock_is_flagged_and_published() {
        let writer = writer();
        let subscription = writer.bus.subscribe();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(5)), dec!(6)).await.unwrap();

        let receipt = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Sale, ChangeSource::receipt_line(7, 1), dec!(2), Direction::Subtract),
            )
            .await
            .unwrap();

        assert!(receipt.below_minimum);
        let events = subscription.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tenant_id(), tenant_id);
        assert!(events[0].payload().below_minimum);
        assert_eq!(events[0].payload().stock_after, dec!(4));
    }

    #[tokio::test]
    async fn settings_update_keeps_units() {
        let writer = writer();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(3)).await.unwrap();

        let level = writer
            .update_settings(
                tenant_id,
                key,
                StockSettings {
                    price: dec!(3000),
                    cost: dec!(1200),
                    minimum_stock_level: dec!(1),
                    is_sellable: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(level.units, dec!(3));
        assert_eq!(level.price, dec!(3000));

        let err = writer
            .update_settings(
                tenant_id,
                key,
                StockSettings {
                    price: dec!(-1),
                    ..level.settings()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    /// Store whose commits always lose the version race.
    struct AlwaysConflicting(InMemoryLedgerStore);

    #[async_trait::async_trait]
    impl LedgerStore for AlwaysConflicting {
        async fn link_product(&self, level: StockLevel) -> Result<StockLevel, LedgerStoreError> {
            self.0.link_product(level).await
        }
        async fn update_settings(
            &self,
            tenant_id: TenantId,
            key: StockKey,
            settings: StockSettings,
        ) -> Result<StockLevel, LedgerStoreError> {
            self.0.update_settings(tenant_id, key, settings).await
        }
        async fn unlink_product(&self, tenant_id: TenantId, key: StockKey) -> Result<(), LedgerStoreError> {
            self.0.unlink_product(tenant_id, key).await
        }
        async fn load_stock_level(
            &self,
            tenant_id: TenantId,
            key: StockKey,
        ) -> Result<Option<StockLevel>, LedgerStoreError> {
            self.0.load_stock_level(tenant_id, key).await
        }
        async fn list_stock_levels(
            &self,
            tenant_id: TenantId,
            stores: Option<&[StoreId]>,
        ) -> Result<Vec<StockLevel>, LedgerStoreError> {
            self.0.list_stock_levels(tenant_id, stores).await
        }
        async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerStoreError> {
            self.0.list_tenants().await
        }
        async fn find_entry(
            &self,
            tenant_id: TenantId,
            key: &stockledger_inventory::IdempotencyKey,
        ) -> Result<Option<HistoryEntry>, LedgerStoreError> {
            self.0.find_entry(tenant_id, key).await
        }
        async fn commit_change(&self, _commit: StockCommit) -> Result<CommitOutcome, LedgerStoreError> {
            Err(LedgerStoreError::Concurrency("row moved".to_string()))
        }
        async fn query_history(
            &self,
            tenant_id: TenantId,
            filter: &HistoryFilter,
            pagination: Pagination,
        ) -> Result<crate::history::query::HistoryPage, LedgerStoreError> {
            self.0.query_history(tenant_id, filter, pagination).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let writer = LedgerWriter::new(
            AlwaysConflicting(InMemoryLedgerStore::new()),
            Arc::new(InMemoryEventBus::<StockChangedEnvelope>::new()),
            clock,
        )
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)));

        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();

        let err = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(1, 1), dec!(1), Direction::Add),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Conflict(ref msg) if msg.contains("3 attempts")));
    }

    #[tokio::test]
    async fn configured_attempts_bound_conflict_retries() {
        let config = WriterConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let writer = LedgerWriter::from_config(
            AlwaysConflicting(InMemoryLedgerStore::new()),
            Arc::new(InMemoryEventBus::<StockChangedEnvelope>::new()),
            Arc::new(FixedClock::new(Utc::now())),
            &config,
        );

        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();

        let err = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(1, 1), dec!(1), Direction::Add),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Conflict(ref msg) if msg.contains("2 attempts")));
    }

    #[tokio::test]
    async fn out_of_range_delta_is_rejected_without_mutation() {
        let writer = writer();
        let subscription = writer.bus.subscribe();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(1)).await.unwrap();

        let err = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(8, 1), Decimal::MAX, Direction::Add),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        let level = writer.store().load_stock_level(tenant_id, key).await.unwrap().unwrap();
        assert_eq!(level.units, dec!(1));
        assert_eq!(level.version, 0);
        assert!(subscription.drain().is_empty());
    }

    /// Bus that rejects every publish.
    struct BrokenBus;

    impl EventBus<StockChangedEnvelope> for BrokenBus {
        type Error = InMemoryBusError;

        fn publish(&self, _message: StockChangedEnvelope) -> Result<(), Self::Error> {
            Err(InMemoryBusError::Poisoned)
        }

        fn subscribe(&self) -> stockledger_events::Subscription<StockChangedEnvelope> {
            let (_tx, rx) = std::sync::mpsc::channel();
            stockledger_events::Subscription::new(rx)
        }
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_committed_change() {
        let writer = LedgerWriter::new(
            Arc::new(InMemoryLedgerStore::new()),
            BrokenBus,
            Arc::new(FixedClock::new(Utc::now())),
        );
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();

        let receipt = writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(1, 1), dec!(4), Direction::Add),
            )
            .await
            .unwrap();

        assert_eq!(receipt.new_units, dec!(4));
        let level = writer.store().load_stock_level(tenant_id, key).await.unwrap().unwrap();
        assert_eq!(level.units, dec!(4));
    }

    #[derive(Clone, Default)]
    struct RecordedFields(Arc<std::sync::Mutex<Vec<String>>>);

    struct FieldNames<'a>(&'a mut Vec<String>);

    impl tracing::field::Visit for FieldNames<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {
            self.0.push(field.name().to_owned());
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RecordedFields {
        fn on_record(
            &self,
            _id: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut names = self.0.lock().unwrap();
            values.record(&mut FieldNames(&mut names));
        }
    }

    #[tokio::test]
    async fn attempts_are_recorded_on_the_change_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let recorded = RecordedFields::default();
        let subscriber = tracing_subscriber::registry().with(recorded.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let writer = writer();
        let tenant_id = TenantId::new();
        let key = StockKey::new(StoreId::new(), ProductId::new());
        writer.link_product(tenant_id, key, settings(dec!(0)), dec!(0)).await.unwrap();
        writer
            .apply_stock_change(
                tenant_id,
                change(key, Reason::Receive, ChangeSource::purchase_line(7, 1), dec!(3), Direction::Add),
            )
            .await
            .unwrap();

        let names = recorded.0.lock().unwrap();
        assert!(names.iter().any(|name| name == "attempts"), "recorded: {names:?}");
    }
}
