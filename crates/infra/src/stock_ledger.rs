//! Stock ledger: per-(product, warehouse) balances plus the movement log.
//!
//! Every mutating call plans the command against the balance rows it touches
//! (read through the open unit of work), writes those rows with a version
//! check and appends the movement. Nothing is written unless everything is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::instrument;

use tallyerp_core::{MovementId, ProductId, WarehouseId};
use tallyerp_inventory::{
    InventoryError, InventoryMovement, IssueStock, LowStockAlert, MinStockRule, MovementEntry,
    ReceiveStock, StockBalance, StockCommand, StockKey, TransferStock, evaluate_low_stock,
};

use crate::error::LedgerResult;
use crate::reference::WarehouseDirectory;
use crate::store::{LedgerStore, UnitOfWork};

pub struct StockLedger<S> {
    store: Arc<S>,
    warehouses: Arc<dyn WarehouseDirectory>,
}

impl<S> Clone for StockLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            warehouses: Arc::clone(&self.warehouses),
        }
    }
}

impl<S: LedgerStore> StockLedger<S> {
    pub fn new(store: Arc<S>, warehouses: Arc<dyn WarehouseDirectory>) -> Self {
        Self { store, warehouses }
    }

    /// On-hand quantity; zero when no row exists yet.
    pub fn balance(&self, product: ProductId, warehouse: WarehouseId) -> LedgerResult<Decimal> {
        self.ensure_known(warehouse)?;
        let balance = self.store.balance(StockKey::new(product, warehouse))?;
        Ok(balance.map(|b| b.quantity).unwrap_or(Decimal::ZERO))
    }

    pub fn balances(
        &self,
        product: Option<ProductId>,
        warehouse: Option<WarehouseId>,
    ) -> LedgerResult<Vec<StockBalance>> {
        if let Some(warehouse) = warehouse {
            self.ensure_known(warehouse)?;
        }
        Ok(self.store.balances(product, warehouse)?)
    }

    /// Movement history for `product` since `since`, newest first.
    pub fn movements(
        &self,
        product: ProductId,
        since: DateTime<Utc>,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let movements = self.store.movements(product, since)?;
        Ok(InventoryMovement::history(&movements, product, since))
    }

    /// Rules whose product (or product in one warehouse) is below its minimum.
    pub fn low_stock_alerts(&self, rules: &[MinStockRule]) -> LedgerResult<Vec<LowStockAlert>> {
        let balances = self.store.balances(None, None)?;
        let alerts = evaluate_low_stock(rules, &balances);
        if !alerts.is_empty() {
            tracing::debug!(alerts = alerts.len(), "low stock detected");
        }
        Ok(alerts)
    }

    pub fn receive(&self, cmd: ReceiveStock) -> LedgerResult<MovementId> {
        self.execute(&StockCommand::Receive(cmd))
    }

    pub fn issue(&self, cmd: IssueStock) -> LedgerResult<MovementId> {
        self.execute(&StockCommand::Issue(cmd))
    }

    /// Issue from `from` and receive into `to` as one unit.
    pub fn transfer(&self, cmd: TransferStock) -> LedgerResult<MovementId> {
        self.execute(&StockCommand::Transfer(cmd))
    }

    /// Apply `cmd` in a unit of work of its own.
    pub fn execute(&self, cmd: &StockCommand) -> LedgerResult<MovementId> {
        let mut tx = self.store.begin()?;
        let movement = self.execute_in(&mut tx, cmd)?;
        tx.commit()?;

        tracing::info!(
            movement_id = %movement,
            kind = cmd.kind().as_str(),
            reference = cmd.reference(),
            lines = cmd.lines().len(),
            "stock movement committed"
        );
        Ok(movement)
    }

    pub fn receive_in<U: UnitOfWork>(&self, tx: &mut U, cmd: ReceiveStock) -> LedgerResult<MovementId> {
        self.execute_in(tx, &StockCommand::Receive(cmd))
    }

    pub fn issue_in<U: UnitOfWork>(&self, tx: &mut U, cmd: IssueStock) -> LedgerResult<MovementId> {
        self.execute_in(tx, &StockCommand::Issue(cmd))
    }

    pub fn transfer_in<U: UnitOfWork>(
        &self,
        tx: &mut U,
        cmd: TransferStock,
    ) -> LedgerResult<MovementId> {
        self.execute_in(tx, &StockCommand::Transfer(cmd))
    }

    /// Stage `cmd` in the caller's unit of work. The caller commits.
    #[instrument(skip(self, tx, cmd), fields(kind = cmd.kind().as_str(), reference = cmd.reference()), err)]
    pub fn execute_in<U: UnitOfWork>(&self, tx: &mut U, cmd: &StockCommand) -> LedgerResult<MovementId> {
        cmd.validate()?;
        for warehouse in cmd.warehouses() {
            self.ensure_known(warehouse)?;
        }

        let snapshot = tx.load_balances(&cmd.touched_keys())?;
        let plan = match cmd.plan(MovementId::new(), &snapshot) {
            Ok(plan) => plan,
            Err(err) => {
                if let InventoryError::InsufficientStock { .. } = &err {
                    tracing::warn!(error = %err, "stock movement rejected");
                }
                return Err(err.into());
            }
        };

        for write in &plan.writes {
            tx.write_balance(write)?;
        }
        tx.append_movement(&plan.movement)?;

        Ok(plan.movement.id)
    }

    fn ensure_known(&self, warehouse: WarehouseId) -> LedgerResult<()> {
        match self.warehouses.warehouse(warehouse)? {
            Some(_) => Ok(()),
            None => Err(InventoryError::UnknownWarehouse(warehouse).into()),
        }
    }
}
