//! Transactional persistence for the ledger core.
//!
//! Every write goes through a [`UnitOfWork`] obtained from
//! [`LedgerStore::begin`]. A unit of work either commits as a whole or, when
//! dropped without [`UnitOfWork::commit`], leaves no trace.
//!
//! Balance rows carry a version. Each write names the version it was planned
//! against ([`ExpectedVersion`]); a mismatch is a [`StoreError::Concurrency`]
//! and poisons nothing but the current unit of work.
//!
//! [`ExpectedVersion`]: tallyerp_core::ExpectedVersion

pub mod in_memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tallyerp_accounting::GlTransaction;
use tallyerp_approval::ApprovalDecision;
use tallyerp_core::{ProductId, ReferenceId, TransactionId, WarehouseId};
use tallyerp_inventory::{BalanceWrite, InventoryMovement, StockBalance, StockKey, StockSnapshot};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to business-rule failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A versioned write lost a race (or was planned against stale data).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One atomic unit of ledger writes.
///
/// Reads issued through the unit of work observe its own staged writes.
pub trait UnitOfWork {
    /// Current rows for `keys`; absent rows are simply missing from the snapshot.
    fn load_balances(&mut self, keys: &[StockKey]) -> Result<StockSnapshot, StoreError>;

    /// Create or update one balance row, guarded by `write.expected`.
    fn write_balance(&mut self, write: &BalanceWrite) -> Result<(), StoreError>;

    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError>;

    fn append_decision(&mut self, decision: &ApprovalDecision) -> Result<(), StoreError>;

    /// Next value of the GL numbering sequence. Values are never reused, even
    /// when the unit of work rolls back.
    fn next_transaction_sequence(&mut self) -> Result<u64, StoreError>;

    fn insert_transaction(&mut self, transaction: &GlTransaction) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

/// Ledger persistence: a unit-of-work factory plus committed-state queries.
pub trait LedgerStore: Send + Sync {
    type Tx<'a>: UnitOfWork
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;

    fn balance(&self, key: StockKey) -> Result<Option<StockBalance>, StoreError>;

    /// Balance rows, optionally narrowed to one product and/or one warehouse,
    /// ordered by key.
    fn balances(
        &self,
        product: Option<ProductId>,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<StockBalance>, StoreError>;

    /// Movements at or after `since` that carry at least one line for `product`.
    fn movements(
        &self,
        product: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InventoryMovement>, StoreError>;

    /// Decisions recorded for `reference`, in recording order.
    fn decisions(&self, reference: ReferenceId) -> Result<Vec<ApprovalDecision>, StoreError>;

    fn transaction(&self, id: TransactionId) -> Result<Option<GlTransaction>, StoreError>;
}
