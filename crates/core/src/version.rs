//! Optimistic concurrency expectations for versioned rows.

/// Version a row must still be at when it is written back.
///
/// Versions start at 1 when a row is first written. `ExpectedVersion(0)`
/// therefore means "the row must not exist yet".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    /// Expectation for a row that was read at `current` (`None` = absent).
    pub fn from_current(current: Option<u64>) -> Self {
        ExpectedVersion(current.unwrap_or(0))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }
}
