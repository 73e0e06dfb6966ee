use chrono::{DateTime, Utc};

/// A fact about a committed ledger change.
///
/// Events are immutable and only ever published after the history entry
/// they describe is durable.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Routing name, e.g. "inventory.stock.changed".
    fn event_type(&self) -> &'static str;

    /// Payload schema version. Bump when a field changes meaning.
    fn schema_version(&self) -> u32 {
        1
    }

    /// When the underlying change was recorded.
    fn occurred_at(&self) -> DateTime<Utc>;
}
