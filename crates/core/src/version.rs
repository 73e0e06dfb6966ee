//! Optimistic concurrency expectations for mutable rows.

/// Version a stock row must still be at when a planned change commits.
///
/// Stock level rows carry a version counter that is bumped on every committed
/// mutation. Writers read the row, plan a change, and commit with the version
/// they read so a concurrent commit in between is detected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    pub const fn exact(version: u64) -> Self {
        Self(version)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }
}
