//! Inventory domain module: stock balances and the movement log.
//!
//! This crate contains business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no storage). A [`StockCommand`] is
//! planned against a [`StockSnapshot`] of the balance rows it touches and
//! yields a [`StockPlan`]: the movement to append plus the balance rows to
//! write, each guarded by an expected version.

pub mod alert;
pub mod balance;
pub mod command;
pub mod error;
pub mod movement;
pub mod warehouse;

pub use alert::{LowStockAlert, MinStockRule, evaluate_low_stock};
pub use balance::{StockBalance, StockKey, StockSnapshot};
pub use command::{BalanceWrite, IssueStock, ReceiveStock, StockCommand, StockPlan, TransferStock};
pub use error::InventoryError;
pub use movement::{InventoryMovement, MovementEntry, MovementKind, MovementLine};
pub use warehouse::Warehouse;
