use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use tallyerp_accounting::GlTransaction;
use tallyerp_approval::ApprovalDecision;
use tallyerp_core::{ProductId, ReferenceId, TransactionId, WarehouseId};
use tallyerp_inventory::{BalanceWrite, InventoryMovement, StockBalance, StockKey, StockSnapshot};

use super::{LedgerStore, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct LedgerState {
    balances: BTreeMap<StockKey, StockBalance>,
    movements: Vec<InventoryMovement>,
    decisions: Vec<ApprovalDecision>,
    transactions: Vec<GlTransaction>,
    gl_sequence: u64,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A unit of work holds the store lock from `begin`
/// until it is committed or dropped, so units of work are serialised.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// Writes staged by an in-memory unit of work; applied only on commit.
#[derive(Debug, Default)]
struct Staged {
    balances: BTreeMap<StockKey, StockBalance>,
    movements: Vec<InventoryMovement>,
    decisions: Vec<ApprovalDecision>,
    transactions: Vec<GlTransaction>,
}

pub struct InMemoryUnitOfWork<'a> {
    state: MutexGuard<'a, LedgerState>,
    staged: Staged,
}

impl InMemoryUnitOfWork<'_> {
    fn current(&self, key: &StockKey) -> Option<&StockBalance> {
        self.staged
            .balances
            .get(key)
            .or_else(|| self.state.balances.get(key))
    }
}

impl UnitOfWork for InMemoryUnitOfWork<'_> {
    fn load_balances(&mut self, keys: &[StockKey]) -> Result<StockSnapshot, StoreError> {
        Ok(keys.iter().filter_map(|k| self.current(k).cloned()).collect())
    }

    fn write_balance(&mut self, write: &BalanceWrite) -> Result<(), StoreError> {
        let key = write.balance.key;
        let actual = self.current(&key).map(|b| b.version).unwrap_or(0);
        if !write.expected.matches(actual) {
            return Err(StoreError::Concurrency(format!(
                "balance {key}: expected version {}, found version {actual}",
                write.expected.get()
            )));
        }

        self.staged.balances.insert(key, write.balance.clone());
        Ok(())
    }

    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        let exists = self
            .state
            .movements
            .iter()
            .chain(&self.staged.movements)
            .any(|m| m.id == movement.id);
        if exists {
            return Err(StoreError::Duplicate(format!("movement {}", movement.id)));
        }

        self.staged.movements.push(movement.clone());
        Ok(())
    }

    fn append_decision(&mut self, decision: &ApprovalDecision) -> Result<(), StoreError> {
        let exists = self
            .state
            .decisions
            .iter()
            .chain(&self.staged.decisions)
            .any(|d| d.id == decision.id);
        if exists {
            return Err(StoreError::Duplicate(format!("decision {}", decision.id)));
        }

        self.staged.decisions.push(decision.clone());
        Ok(())
    }

    fn next_transaction_sequence(&mut self) -> Result<u64, StoreError> {
        self.state.gl_sequence += 1;
        Ok(self.state.gl_sequence)
    }

    fn insert_transaction(&mut self, transaction: &GlTransaction) -> Result<(), StoreError> {
        let exists = self
            .state
            .transactions
            .iter()
            .chain(&self.staged.transactions)
            .any(|t| t.id == transaction.id || t.number == transaction.number);
        if exists {
            return Err(StoreError::Duplicate(format!(
                "GL transaction {} ({})",
                transaction.id, transaction.number
            )));
        }

        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        let Self { mut state, staged } = self;
        state.balances.extend(staged.balances);
        state.movements.extend(staged.movements);
        state.decisions.extend(staged.decisions);
        state.transactions.extend(staged.transactions);
        Ok(())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx<'a>
        = InMemoryUnitOfWork<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        Ok(InMemoryUnitOfWork {
            state: self.lock()?,
            staged: Staged::default(),
        })
    }

    fn balance(&self, key: StockKey) -> Result<Option<StockBalance>, StoreError> {
        Ok(self.lock()?.balances.get(&key).cloned())
    }

    fn balances(
        &self,
        product: Option<ProductId>,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .balances
            .values()
            .filter(|b| product.is_none_or(|p| b.key.product_id == p))
            .filter(|b| warehouse.is_none_or(|w| b.key.warehouse_id == w))
            .cloned()
            .collect())
    }

    fn movements(
        &self,
        product: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.occurred_at >= since)
            .filter(|m| m.lines.iter().any(|l| l.product_id == product))
            .cloned()
            .collect())
    }

    fn decisions(&self, reference: ReferenceId) -> Result<Vec<ApprovalDecision>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .decisions
            .iter()
            .filter(|d| d.reference_id == reference)
            .cloned()
            .collect())
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<GlTransaction>, StoreError> {
        let state = self.lock()?;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }
}
