//! `stockledger-core`: identifiers, clock, versions and the domain error model.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod version;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{ProductId, StoreId, TenantId, UserId};
pub use version::ExpectedVersion;
