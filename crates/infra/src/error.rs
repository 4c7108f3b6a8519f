//! Unified error for ledger operations.

use thiserror::Error;

use tallyerp_accounting::PostingError;
use tallyerp_approval::ApprovalError;
use tallyerp_auth::DirectoryError;
use tallyerp_inventory::InventoryError;

use crate::store::StoreError;

/// Every failure a ledger operation can surface.
///
/// Business-rule failures are deterministic: repeating the call with the same
/// inputs against the same state fails the same way. Only
/// [`LedgerError::Concurrency`] is worth retrying.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Posting(#[from] PostingError),

    #[error("role directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Concurrency(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::Concurrency(msg),
            other => LedgerError::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
