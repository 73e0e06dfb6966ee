//! Ledger events and their post-commit distribution.
//!
//! The ledger writer appends history inside its transaction and only then hands
//! an [`EventEnvelope`] to an [`EventBus`]. Nothing in this crate takes part in
//! the write path itself.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
