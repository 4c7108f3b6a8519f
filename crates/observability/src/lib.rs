//! Process-wide logging setup shared by the ledger binaries.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Install the subscriber in `format`, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}
